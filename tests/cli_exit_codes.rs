use anyhow::Result;
use std::path::Path;
use std::process::{Command, Output};

fn write_file(root: &Path, rel: &str, data: &[u8]) -> Result<()> {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

fn dirdiff(args: &[&str], a: &Path, b: &Path) -> Result<Output> {
    Ok(Command::new(env!("CARGO_BIN_EXE_dirdiff"))
        .args(["-P", "-C"])
        .args(args)
        .arg(a)
        .arg(b)
        .output()?)
}

fn stdout_lines(out: &Output) -> Vec<String> {
    String::from_utf8_lossy(&out.stdout).lines().map(str::to_string).collect()
}

#[test]
fn identical_modified_and_subset_exit_codes() -> Result<()> {
    let a = tempfile::tempdir()?;
    let b = tempfile::tempdir()?;
    write_file(a.path(), "file1", b"x")?;
    write_file(a.path(), "file2", b"y")?;
    write_file(b.path(), "file1", b"x")?;
    write_file(b.path(), "file2", b"y")?;

    let out = dirdiff(&[], a.path(), b.path())?;
    assert_eq!(out.status.code(), Some(0));
    assert!(out.stdout.is_empty());

    write_file(b.path(), "file2", b"z")?;
    let out = dirdiff(&[], a.path(), b.path())?;
    assert_eq!(out.status.code(), Some(1));
    assert_eq!(stdout_lines(&out), vec!["~ file2"]);

    let c = tempfile::tempdir()?;
    let d = tempfile::tempdir()?;
    write_file(c.path(), "file1", b"x")?;
    write_file(d.path(), "file1", b"x")?;
    write_file(d.path(), "file2", b"y")?;
    let out = dirdiff(&[], c.path(), d.path())?;
    assert_eq!(out.status.code(), Some(3));
    assert_eq!(stdout_lines(&out), vec!["+ file2"]);

    let out = dirdiff(&[], d.path(), c.path())?;
    assert_eq!(out.status.code(), Some(4));
    assert_eq!(stdout_lines(&out), vec!["- file2"]);
    Ok(())
}

#[test]
fn quiet_prints_nothing_and_verbose_summarizes() -> Result<()> {
    let a = tempfile::tempdir()?;
    let b = tempfile::tempdir()?;
    write_file(a.path(), "same", b"s")?;
    write_file(b.path(), "same", b"s")?;
    write_file(b.path(), "new/inner.txt", b"n")?;

    let out = dirdiff(&["-q"], a.path(), b.path())?;
    assert_eq!(out.status.code(), Some(3));
    assert!(out.stdout.is_empty());
    assert!(out.stderr.is_empty());

    let out = dirdiff(&["-V"], a.path(), b.path())?;
    assert_eq!(out.status.code(), Some(3));
    assert_eq!(stdout_lines(&out), vec!["+ new/"]);
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr
        .contains("Summary: 1 added dirs (subdirectories/files inside them not listed)\n"));
    assert!(stderr.contains("Directory A is a subset of directory B."));
    Ok(())
}

#[test]
fn verbose_identical_prints_only_the_verdict() -> Result<()> {
    let a = tempfile::tempdir()?;
    let b = tempfile::tempdir()?;
    write_file(a.path(), "same", b"s")?;
    write_file(b.path(), "same", b"s")?;

    let out = dirdiff(&["-V"], a.path(), b.path())?;
    assert_eq!(out.status.code(), Some(0));
    assert!(out.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(!stderr.contains("Summary:"), "unexpected stderr: {}", stderr);
    assert!(stderr.contains("Directories are identical.\n"));
    Ok(())
}

#[test]
fn same_path_short_circuits() -> Result<()> {
    let a = tempfile::tempdir()?;
    write_file(a.path(), "f", b"f")?;
    let out = dirdiff(&["-V"], a.path(), a.path())?;
    assert_eq!(out.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&out.stderr).contains("Directories are identical (same path:"));
    Ok(())
}

#[test]
fn errors_exit_with_two() -> Result<()> {
    let a = tempfile::tempdir()?;
    let missing = a.path().join("missing");

    let out = dirdiff(&[], a.path(), &missing)?;
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).starts_with("Error: "));

    let out = dirdiff(&["--fast-limit", "0"], a.path(), a.path())?;
    assert_eq!(out.status.code(), Some(2));

    let b = tempfile::tempdir()?;
    let out = dirdiff(&["-e", "[unclosed"], a.path(), b.path())?;
    assert_eq!(out.status.code(), Some(2));
    Ok(())
}
