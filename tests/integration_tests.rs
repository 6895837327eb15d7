use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;

fn lila() -> Command {
    Command::cargo_bin("lila").unwrap()
}

#[test]
fn runs_without_arguments() {
    lila().assert().success();
}

#[test]
fn runs_hello_world() {
    lila()
        .arg("tests/files/hello.lila")
        .assert()
        .success()
        .stdout(contains("Hello, world!"))
        .stdout(contains("Halted"));
}

#[test]
fn prints_final_state() {
    lila()
        .args(["run", "tests/files/factorial.lila", "--minimal"])
        .assert()
        .success()
        .stdout(contains("areg 120\n"))
        .stdout(contains("creg 0\n"))
        .stdout(contains("zf 1\n"))
        .stdout(contains("Halted").not());
}

#[test]
fn calls_and_returns() {
    lila()
        .args(["run", "--minimal", "tests/files/stack.lila"])
        .assert()
        .success()
        .stdout(contains("areg 14\n"))
        .stdout(contains("sreg 0\n"))
        .stdout(contains("[-2] 2\n"))
        .stdout(contains("[-1] 14\n"));
}

#[test]
fn reads_from_stdin() {
    lila()
        .args(["run", "--minimal", "tests/files/read.lila"])
        .write_stdin("Bob\n")
        .assert()
        .success()
        .stdout(contains("Name? Bob"))
        .stdout(contains("[6] 66\n"))
        .stdout(contains("[9] 0\n"));
}

#[test]
fn reports_compile_errors() {
    lila()
        .args(["run", "--minimal", "tests/files/syntax_error.lila"])
        .assert()
        .failure()
        .stderr(contains("SyntaxError on line 2"));

    lila()
        .args(["check", "tests/files/syntax_error.lila"])
        .assert()
        .failure()
        .stderr(contains("lila::syntax"));
}

#[test]
fn reports_runtime_errors_with_state() {
    lila()
        .args(["run", "--minimal", "tests/files/bad_jump.lila"])
        .assert()
        .failure()
        .stdout(contains("areg 3\n"))
        .stderr(contains("ReferenceError on line 2"))
        .stderr(contains("nowhere"));
}

#[test]
fn stops_at_step_limit() {
    lila()
        .args(["run", "--minimal", "--max-steps", "100", "tests/files/forever.lila"])
        .assert()
        .failure()
        .stdout(contains("areg 50\n"))
        .stderr(contains("StepLimitError"));
}

#[test]
fn step_limit_from_environment() {
    lila()
        .args(["run", "--minimal", "tests/files/forever.lila"])
        .env("LILA_MAX_STEPS", "100")
        .assert()
        .failure()
        .stdout(contains("areg 50\n"))
        .stderr(contains("StepLimitError"));

    // The flag wins over the environment
    lila()
        .args(["run", "--minimal", "--max-steps", "10", "tests/files/forever.lila"])
        .env("LILA_MAX_STEPS", "100")
        .assert()
        .failure()
        .stdout(contains("areg 5\n"));
}

#[test]
fn checks_with_listing() {
    lila()
        .args(["check", "--listing", "tests/files/factorial.lila"])
        .assert()
        .success()
        .stdout(contains("LOOP:"))
        .stdout(contains("MUL areg, creg"))
        .stdout(contains("JNE loop"))
        .stdout(contains("no errors found!"));
}

#[test]
fn traces_when_enabled() {
    lila()
        .args(["run", "--minimal", "tests/files/factorial.lila"])
        .env("LILA_TRACE", "1")
        .assert()
        .success()
        .stderr(contains("Trace"))
        .stderr(contains("MUL areg, creg"));
}

#[test]
fn missing_file() {
    lila()
        .args(["run", "tests/files/does_not_exist.lila"])
        .assert()
        .failure();
}
