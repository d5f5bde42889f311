use std::process::Command;

#[test]
fn fails_without_jwt_secret() {
    let exe = env!("CARGO_BIN_EXE_coach-ledger");
    let output = Command::new(exe)
        .env_remove("JWT_SECRET")
        .env("EARNINGS_STORE", "memory")
        .output()
        .expect("failed to run coach-ledger binary");
    assert!(!output.status.success());
}
