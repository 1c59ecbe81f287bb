use std::process::Command;

fn main() {
    // Capture git commit hash at compile time
    let git_hash = run(&["git", "rev-parse", "--short", "HEAD"]);
    println!("cargo:rustc-env=SWITCHBOARD_GIT_HASH={}", git_hash);

    let build_date = run(&["date", "-u", "+%Y-%m-%d"]);
    println!("cargo:rustc-env=SWITCHBOARD_BUILD_DATE={}", build_date);

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/");
}

/// Trimmed stdout of `args`, or `unknown` when the command is unavailable.
fn run(args: &[&str]) -> String {
    Command::new(args[0])
        .args(&args[1..])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
