//! End-to-end runs through docker. These need a local daemon and the runner
//! image (`docker build -t runbox-runner:latest runner/`), hence `#[ignore]`:
//!
//!     cargo test -p runbox-executor -- --ignored

use runbox_executor::{Config, Error, ExecutionRequest, Executor, Outcome, TIMEOUT_EXIT_CODE};
use runbox_utils::tracing::setup_tracing;

use std::fs;
use std::sync::Once;
use std::time::{Duration, Instant};

const CONFIG: &str = r#"
workspace_root = "/tmp/runbox-test"
docker = "docker"
image = "runbox-runner:latest"
uid = 1000
gid = 1000

[compiler]
bin = "g++"
flags = ["-std=c++17", "-O2"]
source_name = "main.cpp"
artifact_name = "main"
time_limit = 30000

[limits]
source = "1 MiB"
input = "1 MiB"
output = "1 MiB"
memory = "256 MiB"
cpus = 1.0
pids = 64
time_limit = 2000
kill_after = 500
supervisor_grace = 3000
"#;

fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(setup_tracing);
}

fn executor(dir: &tempfile::TempDir, docker: &str) -> Executor {
    init();
    let mut config = Config::from_toml(CONFIG).unwrap();
    config.workspace_root = dir.path().join("workspaces");
    config.docker = docker.into();
    Executor::new(config).unwrap()
}

fn assert_no_workspaces(executor: &Executor) {
    let left: Vec<_> = fs::read_dir(executor.workspaces().root()).unwrap().collect();
    assert!(left.is_empty(), "{:?}", left);
}

#[tokio::test(flavor = "multi_thread")]
async fn unavailable_isolation_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let executor = executor(&dir, "/nonexistent/docker");

    let request = ExecutionRequest::batch("int main() { return 0; }", None);
    let err = executor.execute(&request).await.unwrap_err();
    assert!(matches!(err, Error::Isolation { .. }), "{:?}", err);
    assert_no_workspaces(&executor);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn hello_with_input() {
    let dir = tempfile::tempdir().unwrap();
    let executor = executor(&dir, "docker");

    let source = r#"
        #include <iostream>
        int main() {
            int a, b;
            std::cin >> a >> b;
            std::cout << a + b << std::endl;
            std::cerr << "done" << std::endl;
            return 0;
        }
    "#;
    let request = ExecutionRequest::batch(source, Some("3 4\n".into()));
    match executor.execute(&request).await.unwrap() {
        Outcome::Executed(outcome) => {
            assert_eq!(outcome.stdout, "7\n");
            assert_eq!(outcome.stderr, "done\n");
            assert_eq!(outcome.exit_code, 0);
            assert!(!outcome.timed_out);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_no_workspaces(&executor);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn compile_error_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let executor = executor(&dir, "docker");

    let request = ExecutionRequest::batch("int main() { return x; }", None);
    match executor.execute(&request).await.unwrap() {
        Outcome::CompileFailed(build) => {
            assert!(!build.succeeded);
            assert!(!build.timed_out);
            assert!(build.diagnostics.contains("x"), "{}", build.diagnostics);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_no_workspaces(&executor);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn crash_is_a_result() {
    let dir = tempfile::tempdir().unwrap();
    let executor = executor(&dir, "docker");

    let source = "int main() { volatile int *p = nullptr; return *p; }";
    match executor.execute(&ExecutionRequest::batch(source, None)).await.unwrap() {
        Outcome::Executed(outcome) => {
            assert_ne!(outcome.exit_code, 0);
            assert!(!outcome.timed_out);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_no_workspaces(&executor);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn infinite_loop_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let executor = executor(&dir, "docker");

    let t0 = Instant::now();
    let source = "int main() { volatile int x = 0; for (;;) { x++; } }";
    match executor.execute(&ExecutionRequest::batch(source, None)).await.unwrap() {
        Outcome::Executed(outcome) => {
            assert!(outcome.timed_out);
            assert_eq!(outcome.exit_code, TIMEOUT_EXIT_CODE);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    // time limit + kill_after + grace, plus compilation
    assert!(t0.elapsed() < Duration::from_secs(40));
    assert_no_workspaces(&executor);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn printing_loop_is_capped_and_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let executor = executor(&dir, "docker");
    let output_limit = executor.config().limits.output.as_u64() as usize;

    let t0 = Instant::now();
    let source = r#"
        #include <cstdio>
        int main() { for (;;) std::puts("spam spam spam spam spam spam spam spam"); }
    "#;
    match executor.execute(&ExecutionRequest::batch(source, None)).await.unwrap() {
        Outcome::Executed(outcome) => {
            assert!(outcome.timed_out);
            assert_eq!(outcome.exit_code, TIMEOUT_EXIT_CODE);
            assert!(outcome.stdout.starts_with("spam"));
            assert!(outcome.stdout.len() <= output_limit, "{}", outcome.stdout.len());
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(t0.elapsed() < Duration::from_secs(40));
    assert_no_workspaces(&executor);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn concurrent_requests_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let executor = executor(&dir, "docker");

    let crash = ExecutionRequest::batch("#include <cstdlib>\nint main() { std::abort(); }", None);
    let hang = ExecutionRequest::batch("int main() { for (;;) {} }", None);
    let ok = ExecutionRequest::batch("#include <cstdio>\nint main() { std::puts(\"ok\"); }", None);

    let (crash, hang, ok) = futures::join!(
        executor.execute(&crash),
        executor.execute(&hang),
        executor.execute(&ok),
    );

    match crash.unwrap() {
        Outcome::Executed(o) => assert!(o.exit_code != 0 && !o.timed_out),
        other => panic!("unexpected outcome: {:?}", other),
    }
    match hang.unwrap() {
        Outcome::Executed(o) => assert!(o.timed_out),
        other => panic!("unexpected outcome: {:?}", other),
    }
    match ok.unwrap() {
        Outcome::Executed(o) => assert_eq!(o.stdout, "ok\n"),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_no_workspaces(&executor);
}
