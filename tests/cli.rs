use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::File;
use std::io::Write;
use tempfile::tempdir;

/// Two mutations, two samples: mutation A at ~0.9 VAF everywhere, mutation
/// B at ~0.4 everywhere. A dominates B in both samples, so the expected
/// tree is A as root with B as its child.
fn write_dominance_input(dir: &std::path::Path) -> Result<std::path::PathBuf> {
    let path = dir.join("counts.tsv");
    let mut file = File::create(&path)?;
    writeln!(file, "gene_id\ts1\ts2")?;
    writeln!(file, "mutA\t10\t90\t12\t88")?;
    writeln!(file, "mutB\t60\t40\t58\t42")?;
    Ok(path)
}

#[test]
fn dies_without_input_file() -> Result<()> {
    let mut cmd = Command::cargo_bin("vaftree")?;
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("missing read count file"));
    Ok(())
}

#[test]
fn dies_on_unreadable_input() -> Result<()> {
    let mut cmd = Command::cargo_bin("vaftree")?;
    cmd.arg("/no/such/file.tsv");
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("failed to open"));
    Ok(())
}

#[test]
fn dies_on_out_of_domain_alpha() -> Result<()> {
    let dir = tempdir()?;
    let input = write_dominance_input(dir.path())?;
    let mut cmd = Command::cargo_bin("vaftree")?;
    cmd.arg(&input).args(["-a", "0.9"]);
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("alpha should be in [0,0.5]"));
    Ok(())
}

#[test]
fn dies_on_out_of_domain_beta() -> Result<()> {
    let dir = tempdir()?;
    let input = write_dominance_input(dir.path())?;
    let mut cmd = Command::cargo_bin("vaftree")?;
    cmd.arg(&input).args(["-b", "0.2"]);
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("beta should be in [0.5,1]"));
    Ok(())
}

#[test]
fn dies_on_out_of_domain_gamma() -> Result<()> {
    let dir = tempdir()?;
    let input = write_dominance_input(dir.path())?;
    let mut cmd = Command::cargo_bin("vaftree")?;
    cmd.arg(&input).args(["-g", "1.5"]);
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("gamma should be in [0,1]"));
    Ok(())
}

#[test]
fn version_flag_exits_cleanly() -> Result<()> {
    let mut cmd = Command::cargo_bin("vaftree")?;
    cmd.arg("--version");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("vaftree"));
    Ok(())
}

#[test]
fn dies_on_malformed_counts() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("bad.tsv");
    let mut file = File::create(&path)?;
    writeln!(file, "gene_id\ts1")?;
    writeln!(file, "mutA\t-3\t90")?;
    let mut cmd = Command::cargo_bin("vaftree")?;
    cmd.arg(&path);
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("non-negative integer"));
    Ok(())
}

#[test]
fn dominance_scenario_yields_root_and_child() -> Result<()> {
    let dir = tempdir()?;
    let input = write_dominance_input(dir.path())?;
    let mut cmd = Command::cargo_bin("vaftree")?;
    cmd.arg(&input);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("status: optimal"))
        .stdout(predicate::str::contains("mutA\troot"))
        .stdout(predicate::str::contains("mutB\t0"));
    Ok(())
}

#[test]
fn alpha_zero_yields_all_roots() -> Result<()> {
    let dir = tempdir()?;
    let input = write_dominance_input(dir.path())?;
    let mut cmd = Command::cargo_bin("vaftree")?;
    cmd.arg(&input).args(["-a", "0"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("status: optimal"))
        .stdout(predicate::str::contains("mutA\troot"))
        .stdout(predicate::str::contains("mutB\troot"));
    Ok(())
}

#[test]
fn writes_solution_and_dot_files() -> Result<()> {
    let dir = tempdir()?;
    let input = write_dominance_input(dir.path())?;
    let sol = dir.path().join("solution.txt");
    let dot = dir.path().join("tree.dot");
    let mut cmd = Command::cargo_bin("vaftree")?;
    cmd.arg(&input)
        .arg("-s")
        .arg(&sol)
        .arg("-d")
        .arg(&dot);
    cmd.assert().success();

    let sol_text = std::fs::read_to_string(&sol)?;
    assert!(sol_text.contains("status: optimal"));
    assert!(sol_text.contains("mutA\troot"));

    let dot_text = std::fs::read_to_string(&dot)?;
    assert!(dot_text.starts_with("digraph ancestry_tree {"));
    assert!(dot_text.contains("0 -> 1"));
    assert!(dot_text.contains("mutA"));
    Ok(())
}
