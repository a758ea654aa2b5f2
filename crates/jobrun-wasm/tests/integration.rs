//! Integration tests for jobrun-wasm.
//!
//! These tests verify the complete execution pipeline:
//! - Resource limit translation ahead of any module work
//! - Module compilation from mount paths
//! - Import satisfaction and ordering during linking
//! - Entry invocation, outcome classification, and output capture
//! - Concurrent observation and cancellation

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use jobrun_common::{ExecutionRequest, ExecutorError, ModuleReference, OutcomeKind, RuntimeConfig};
use jobrun_executor::Executor;
use jobrun_wasm::WasmExecutor;

fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("jobrun-it-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_module(dir: &std::path::Path, file: &str, wat: &str) -> PathBuf {
    let path = dir.join(file);
    std::fs::write(&path, wat).unwrap();
    path
}

fn request(entry: ModuleReference, imports: Vec<ModuleReference>) -> ExecutionRequest {
    ExecutionRequest {
        execution_id: format!("exec-{}", uuid::Uuid::new_v4()),
        job_id: "job-test".into(),
        entry,
        imports,
        entrypoint: "_start".into(),
        arguments: vec![],
        env: BTreeMap::new(),
        volumes: vec![],
        memory_bytes: 0,
    }
}

fn executor() -> WasmExecutor {
    WasmExecutor::new(&RuntimeConfig::default()).unwrap()
}

// ============================================================================
// Test: Success
// ============================================================================

#[tokio::test]
async fn test_empty_start_exits_zero() {
    let dir = scratch_dir();
    let entry = write_module(&dir, "main.wat", r#"(module (func (export "_start")))"#);

    let executor = executor();
    let outcome = executor
        .run(request(ModuleReference::new("main", entry), vec![]))
        .await
        .unwrap();

    assert_eq!(outcome.kind, OutcomeKind::NormalExit);
    assert_eq!(outcome.exit_code, 0);
    assert!(outcome.is_success());
    assert!(outcome.error_detail.is_none());
}

// ============================================================================
// Test: Explicit Exit Code
// ============================================================================

#[tokio::test]
async fn test_explicit_exit_code_is_used_verbatim() {
    let dir = scratch_dir();
    let entry = write_module(
        &dir,
        "main.wat",
        r#"
            (module
                (import "wasi_snapshot_preview1" "proc_exit" (func $exit (param i32)))
                (func (export "_start") (call $exit (i32.const 42)))
            )
        "#,
    );

    let executor = executor();
    let outcome = executor
        .run(request(ModuleReference::new("main", entry), vec![]))
        .await
        .unwrap();

    assert_eq!(outcome.kind, OutcomeKind::NormalExit);
    assert_eq!(outcome.exit_code, 42);
}

// ============================================================================
// Test: Runtime Trap
// ============================================================================

#[tokio::test]
async fn test_trap_is_exit_code_one() {
    let dir = scratch_dir();
    let entry = write_module(
        &dir,
        "main.wat",
        r#"(module (func (export "_start") unreachable))"#,
    );

    let executor = executor();
    let outcome = executor
        .run(request(ModuleReference::new("main", entry), vec![]))
        .await
        .unwrap();

    assert_eq!(outcome.kind, OutcomeKind::Trapped);
    assert_eq!(outcome.exit_code, 1);
    assert!(outcome.error_detail.is_some());
}

// ============================================================================
// Test: Missing Dependency
// ============================================================================

const NEEDS_DOUBLE: &str = r#"
    (module
        (import "lib" "double" (func $double (param i32) (result i32)))
        (func (export "_start") (drop (call $double (i32.const 21))))
    )
"#;

const PROVIDES_DOUBLE: &str = r#"
    (module
        (func (export "double") (param i32) (result i32)
            (i32.mul (local.get 0) (i32.const 2)))
    )
"#;

#[tokio::test]
async fn test_missing_dependency_never_starts() {
    let dir = scratch_dir();
    let entry = write_module(&dir, "main.wat", NEEDS_DOUBLE);

    let executor = executor();
    let req = request(ModuleReference::new("main", entry), vec![]);
    let execution_id = req.execution_id.clone();
    let err = executor.run(req).await.unwrap_err();

    assert!(matches!(err, ExecutorError::Link { .. }));
    let text = err.to_string();
    assert!(text.contains("lib"), "error should name the namespace: {text}");
    assert!(text.contains("double"), "error should name the import: {text}");
    assert!(!executor.is_active(&execution_id));
}

// ============================================================================
// Test: Satisfied Dependency
// ============================================================================

#[tokio::test]
async fn test_satisfied_dependency_runs() {
    let dir = scratch_dir();
    let entry = write_module(&dir, "main.wat", NEEDS_DOUBLE);
    let lib = write_module(&dir, "lib.wat", PROVIDES_DOUBLE);

    let executor = executor();
    let outcome = executor
        .run(request(
            ModuleReference::new("main", entry),
            vec![ModuleReference::new("lib", lib)],
        ))
        .await
        .unwrap();

    assert_eq!(outcome.kind, OutcomeKind::NormalExit);
    assert_eq!(outcome.exit_code, 0);
}

// ============================================================================
// Test: Exact Signature Matching
// ============================================================================

#[tokio::test]
async fn test_same_name_different_signature_does_not_link() {
    let dir = scratch_dir();
    let entry = write_module(&dir, "main.wat", NEEDS_DOUBLE);
    // Same export name, different parameter type.
    let lib = write_module(
        &dir,
        "lib.wat",
        r#"(module (func (export "double") (param i64) (result i32) (i32.const 0)))"#,
    );

    let executor = executor();
    let err = executor
        .run(request(
            ModuleReference::new("main", entry),
            vec![ModuleReference::new("lib", lib)],
        ))
        .await
        .unwrap_err();

    assert!(matches!(err, ExecutorError::Link { .. }));
    assert!(err.to_string().contains("double"));
}

// ============================================================================
// Test: Import Ordering
// ============================================================================

const LIB_A: &str = r#"
    (module
        (func (export "f") (result i32) (i32.const 7))
    )
"#;

const LIB_B_NEEDS_A: &str = r#"
    (module
        (import "liba" "f" (func $f (result i32)))
        (func (export "g") (result i32) (call $f))
    )
"#;

const ENTRY_NEEDS_B: &str = r#"
    (module
        (import "libb" "g" (func $g (result i32)))
        (func (export "_start") (drop (call $g)))
    )
"#;

#[tokio::test]
async fn test_import_order_dependency_first_links() {
    let dir = scratch_dir();
    let entry = write_module(&dir, "main.wat", ENTRY_NEEDS_B);
    let lib_a = write_module(&dir, "liba.wat", LIB_A);
    let lib_b = write_module(&dir, "libb.wat", LIB_B_NEEDS_A);

    let executor = executor();
    let outcome = executor
        .run(request(
            ModuleReference::new("main", entry),
            vec![
                ModuleReference::new("liba", lib_a),
                ModuleReference::new("libb", lib_b),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(outcome.kind, OutcomeKind::NormalExit);
}

#[tokio::test]
async fn test_forward_reference_among_imports_fails() {
    let dir = scratch_dir();
    let entry = write_module(&dir, "main.wat", ENTRY_NEEDS_B);
    let lib_a = write_module(&dir, "liba.wat", LIB_A);
    let lib_b = write_module(&dir, "libb.wat", LIB_B_NEEDS_A);

    let executor = executor();
    // libb comes first, but it depends on liba which is not yet
    // instantiated: a forward reference.
    let err = executor
        .run(request(
            ModuleReference::new("main", entry),
            vec![
                ModuleReference::new("libb", lib_b),
                ModuleReference::new("liba", lib_a),
            ],
        ))
        .await
        .unwrap_err();

    match err {
        ExecutorError::Link { ref alias, .. } => assert_eq!(alias, "libb"),
        other => panic!("expected link error naming libb, got {other}"),
    }
}

// ============================================================================
// Test: Non-Module Tolerance
// ============================================================================

#[tokio::test]
async fn test_unused_non_module_import_is_immaterial() {
    let dir = scratch_dir();
    let entry = write_module(&dir, "main.wat", r#"(module (func (export "_start")))"#);
    let junk = dir.join("dataset.bin");
    std::fs::write(&junk, b"\x00\x01\x02 definitely not wasm").unwrap();

    let executor = executor();
    let outcome = executor
        .run(request(
            ModuleReference::new("main", entry),
            vec![ModuleReference::new("dataset", junk)],
        ))
        .await
        .unwrap();

    assert_eq!(outcome.kind, OutcomeKind::NormalExit);
    assert_eq!(outcome.exit_code, 0);
}

#[tokio::test]
async fn test_required_non_module_import_fails_with_compile_cause() {
    let dir = scratch_dir();
    let entry = write_module(
        &dir,
        "main.wat",
        r#"
            (module
                (import "dataset" "f" (func $f))
                (func (export "_start") (call $f))
            )
        "#,
    );
    let junk = dir.join("dataset.bin");
    std::fs::write(&junk, b"\x00\x01\x02 definitely not wasm").unwrap();

    let executor = executor();
    let err = executor
        .run(request(
            ModuleReference::new("main", entry),
            vec![ModuleReference::new("dataset", junk)],
        ))
        .await
        .unwrap_err();

    assert!(matches!(err, ExecutorError::Link { .. }));
    let text = err.to_string();
    assert!(
        text.contains("failed to compile"),
        "error should carry the compile cause: {text}"
    );
    assert!(text.contains("dataset"));
}

// ============================================================================
// Test: Resource Limits
// ============================================================================

#[tokio::test]
async fn test_budget_over_ceiling_rejected_before_compilation() {
    let executor = executor();
    // The entry path does not exist: if the limit check did not run
    // first, this would surface as a compile error instead.
    let mut req = request(
        ModuleReference::new("main", "/nonexistent/never-read.wasm"),
        vec![],
    );
    req.memory_bytes = 4_294_967_297;

    let err = executor.run(req).await.unwrap_err();
    assert!(err.is_resource_limit());
}

#[tokio::test]
async fn test_memory_budget_bounds_instantiation() {
    let dir = scratch_dir();
    // Declares a two-page minimum memory; a one-page budget cannot
    // satisfy it.
    let entry = write_module(
        &dir,
        "main.wat",
        r#"(module (memory 2) (func (export "_start")))"#,
    );

    let executor = executor();
    let mut req = request(ModuleReference::new("main", entry), vec![]);
    req.memory_bytes = 65536;

    let err = executor.run(req).await.unwrap_err();
    assert!(matches!(err, ExecutorError::Link { .. }));
}

// ============================================================================
// Test: Output Capture
// ============================================================================

#[tokio::test]
async fn test_stdout_is_captured() {
    let dir = scratch_dir();
    let entry = write_module(
        &dir,
        "main.wat",
        r#"
            (module
                (import "wasi_snapshot_preview1" "fd_write"
                    (func $fd_write (param i32 i32 i32 i32) (result i32)))
                (memory (export "memory") 1)
                (data (i32.const 8) "hello from wasm\n")
                (func (export "_start")
                    ;; iovec at 0: base = 8, len = 16
                    (i32.store (i32.const 0) (i32.const 8))
                    (i32.store (i32.const 4) (i32.const 16))
                    (drop (call $fd_write
                        (i32.const 1)   ;; fd: stdout
                        (i32.const 0)   ;; iovec ptr
                        (i32.const 1)   ;; iovec count
                        (i32.const 24)  ;; nwritten out-ptr
                    )))
            )
        "#,
    );

    let executor = executor();
    let outcome = executor
        .run(request(ModuleReference::new("main", entry), vec![]))
        .await
        .unwrap();

    assert_eq!(outcome.kind, OutcomeKind::NormalExit);
    assert_eq!(&outcome.stdout[..], b"hello from wasm\n");
    assert!(outcome.stderr.is_empty());
}

// ============================================================================
// Test: Concurrent Observation and Cancellation
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_stops_a_spinning_execution() {
    let dir = scratch_dir();
    let entry = write_module(
        &dir,
        "main.wat",
        r#"(module (func (export "_start") (loop (br 0))))"#,
    );

    let executor = Arc::new(executor());
    let req = request(ModuleReference::new("main", entry), vec![]);
    let execution_id = req.execution_id.clone();

    let run = {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move { executor.run(req).await })
    };

    // Wait for the execution to become active.
    let mut waited = Duration::ZERO;
    while !executor.is_active(&execution_id) {
        assert!(waited < Duration::from_secs(5), "execution never became active");
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }

    executor.cancel(&execution_id).await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("cancelled execution did not stop")
        .unwrap()
        .unwrap();

    assert_eq!(outcome.kind, OutcomeKind::Trapped);
    assert_eq!(outcome.exit_code, 1);
    assert!(outcome.error_detail.unwrap().contains("cancelled"));
    assert!(!executor.is_active(&execution_id));
}

// ============================================================================
// Test: Concurrent Executions Share the Engine
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_executions_are_independent() {
    let dir = scratch_dir();
    let good = write_module(&dir, "good.wat", r#"(module (func (export "_start")))"#);
    let bad = write_module(
        &dir,
        "bad.wat",
        r#"(module (func (export "_start") unreachable))"#,
    );

    let executor = Arc::new(executor());
    let mut handles = Vec::new();
    for i in 0..8 {
        let path = if i % 2 == 0 { good.clone() } else { bad.clone() };
        let executor = Arc::clone(&executor);
        handles.push(tokio::spawn(async move {
            executor
                .run(request(ModuleReference::new("main", path), vec![]))
                .await
                .unwrap()
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let outcome = handle.await.unwrap();
        if i % 2 == 0 {
            assert_eq!(outcome.kind, OutcomeKind::NormalExit);
        } else {
            assert_eq!(outcome.kind, OutcomeKind::Trapped);
        }
    }
}
