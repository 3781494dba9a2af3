use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::io::Write;
use std::process::Command;
use tempfile::tempdir;

fn populate(dir: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut file1 = fs::File::create(dir.join("file1.txt"))?;
    writeln!(file1, "Hello, this is the first file.")?;
    let mut file2 = fs::File::create(dir.join("file2.log"))?;
    writeln!(file2, "Some log data here.")?;
    fs::create_dir(dir.join("nested"))?;
    fs::write(dir.join("nested").join("nested_file.dat"), [0u8, 1, 2, 3, 4, 5])?;
    Ok(())
}

#[test]
fn test_cli_create_list_extract_cycle() -> Result<(), Box<dyn std::error::Error>> {
    for archive_name in ["bundle.tar.gz", "bundle.zip", "bundle.tar"] {
        let workspace = tempdir()?;
        let source_dir = workspace.path().join("source");
        fs::create_dir(&source_dir)?;
        populate(&source_dir)?;
        let archive_path = workspace.path().join(archive_name);

        // 1. Create archive; the directory input keeps its own name.
        let mut cmd = Command::cargo_bin("archfs")?;
        cmd.arg("create").arg("--output").arg(&archive_path).arg(&source_dir);
        cmd.assert()
            .success()
            .stdout(predicate::str::contains("Created").and(predicate::str::contains("5 entries")));
        assert!(archive_path.exists());

        // 2. List contents
        let mut cmd = Command::cargo_bin("archfs")?;
        cmd.arg("list").arg(&archive_path);
        cmd.assert().success().stdout(
            predicate::str::contains("source/file1.txt")
                .and(predicate::str::contains("source/file2.log"))
                .and(predicate::str::contains("source/nested/nested_file.dat")),
        );

        // 3. Extract, dropping the leading directory
        let extract_dir = workspace.path().join("out");
        let mut cmd = Command::cargo_bin("archfs")?;
        cmd.arg("extract").arg(&archive_path).arg("-o").arg(&extract_dir).arg("--strip").arg("1");
        cmd.assert()
            .success()
            .stdout(predicate::str::contains("Extracted 3 files"));

        for rel in ["file1.txt", "file2.log", "nested/nested_file.dat"] {
            assert_eq!(fs::read(extract_dir.join(rel))?, fs::read(source_dir.join(rel))?, "{archive_name}: {rel}");
        }
    }
    Ok(())
}

#[test]
fn test_cli_list_json() -> Result<(), Box<dyn std::error::Error>> {
    let workspace = tempdir()?;
    let source_dir = workspace.path().join("source");
    fs::create_dir(&source_dir)?;
    populate(&source_dir)?;
    let archive_path = workspace.path().join("listing.tar");

    Command::cargo_bin("archfs")?
        .arg("c")
        .arg(&source_dir)
        .arg("-o")
        .arg(&archive_path)
        .assert()
        .success();

    let output = Command::cargo_bin("archfs")?
        .arg("list")
        .arg("--json")
        .arg("--strip")
        .arg("1")
        .arg(&archive_path)
        .output()?;
    assert!(output.status.success());
    let listed: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    let entries = listed.as_array().ok_or("expected a JSON array")?;
    assert_eq!(entries.len(), 5);
    let nested = entries
        .iter()
        .find(|e| e["path"] == "nested/nested_file.dat")
        .ok_or("nested file missing from listing")?;
    assert_eq!(nested["size"], 6);
    assert_eq!(nested["kind"], "file");
    Ok(())
}

#[test]
fn test_cli_rejects_non_archive() -> Result<(), Box<dyn std::error::Error>> {
    let workspace = tempdir()?;
    let bogus = workspace.path().join("notes.txt");
    fs::write(&bogus, "shopping list: eggs, milk, bread\n".repeat(30))?;

    let mut cmd = Command::cargo_bin("archfs")?;
    cmd.arg("list").arg(&bogus);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("not a TAR or ZIP archive"));

    let mut cmd = Command::cargo_bin("archfs")?;
    cmd.arg("extract").arg(&bogus).arg("-o").arg(workspace.path().join("out"));
    cmd.assert().failure();
    Ok(())
}

#[test]
fn test_cli_requires_output_for_create() -> Result<(), Box<dyn std::error::Error>> {
    let workspace = tempdir()?;
    let mut cmd = Command::cargo_bin("archfs")?;
    cmd.arg("create").arg(workspace.path());
    cmd.assert().failure().stderr(predicate::str::contains("--output"));
    Ok(())
}
