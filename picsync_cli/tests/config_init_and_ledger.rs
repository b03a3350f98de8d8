use std::fs;
use std::path::PathBuf;
use std::process::Command;

#[test]
fn config_init_is_idempotent_and_ledger_opens() -> anyhow::Result<()> {
    // 1. Setup an isolated config and data root
    let mut base = std::env::temp_dir();
    let unique = format!(
        "picsync_cli_init_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    );
    base.push(unique);
    fs::create_dir_all(&base)?;

    let workspace_root = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("crate dir has a parent")
        .to_path_buf();

    // Helper to run CLI commands
    let run_cli = |args: &[&str]| -> std::process::Output {
        Command::new("cargo")
            .arg("run")
            .arg("-p")
            .arg("picsync_cli")
            .arg("--quiet")
            .arg("--")
            .args(args)
            .env("XDG_CONFIG_HOME", &base)
            .env("XDG_DATA_HOME", &base)
            // Use a separate target directory to avoid locking conflicts with the running test
            .env(
                "CARGO_TARGET_DIR",
                workspace_root.join("target").join("test_cli"),
            )
            .current_dir(&workspace_root)
            .output()
            .expect("failed to execute process")
    };

    // 2. First init writes a starter config
    let output = run_cli(&["config", "init"]);
    if !output.status.success() {
        eprintln!("init failed: {}", String::from_utf8_lossy(&output.stderr));
    }
    assert!(output.status.success());

    let config_file = base.join("picsync").join("local.toml");
    let first = fs::read_to_string(&config_file)?;
    assert!(first.contains("[source]"));
    assert!(first.contains("[rows]"));
    assert!(first.contains("webhook_secret"));
    assert!(first.contains("[[watch]]"));

    // 3. A second init changes nothing, including the generated secret
    let output = run_cli(&["config", "init"]);
    assert!(output.status.success());
    let second = fs::read_to_string(&config_file)?;
    assert_eq!(first, second);

    // 4. Show prints the file as written
    let output = run_cli(&["config", "show"]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8(output.stdout)?, second);

    // 5. The ledger commands run against the freshly initialized instance
    let output = run_cli(&["ledger", "show", "some-remote-id"]);
    if !output.status.success() {
        eprintln!(
            "ledger show failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout)?;
    assert!(
        stdout.contains("No record for remote id"),
        "empty ledger should report a missing record"
    );

    Ok(())
}
