//! Process-level integration tests: spawn the real `dlfi` binary against a
//! temp archive root and assert on its stdout, the way a shell user would
//! see it. No `assert_cmd` — plain `std::process::Command`.

use std::path::Path;
use std::process::{Command, Output};

fn dlfi(root: &Path, args: &[&str]) -> Output {
	Command::new(env!("CARGO_BIN_EXE_dlfi"))
		.arg("--root")
		.arg(root)
		.args(args)
		.output()
		.expect("failed to spawn dlfi binary")
}

#[test]
fn vault_then_show_round_trips_through_the_binary() {
	let dir = tempfile::tempdir().unwrap();

	let create = dlfi(dir.path(), &["vault", "m"]);
	assert!(
		create.status.success(),
		"vault failed: {}",
		String::from_utf8_lossy(&create.stderr)
	);
	let created = String::from_utf8_lossy(&create.stdout);
	assert!(created.starts_with("created vault m ("), "{created}");

	let show = dlfi(dir.path(), &["show", "m"]);
	assert!(
		show.status.success(),
		"show failed: {}",
		String::from_utf8_lossy(&show.stderr)
	);
	let shown = String::from_utf8_lossy(&show.stdout);
	assert!(shown.contains("m (Vault)"), "{shown}");
	assert!(shown.contains("tags: "), "{shown}");
}

#[test]
fn show_on_an_unknown_path_fails_with_a_nonzero_exit() {
	let dir = tempfile::tempdir().unwrap();

	let show = dlfi(dir.path(), &["show", "does/not/exist"]);
	assert!(!show.status.success());
}
