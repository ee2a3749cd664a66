use assert_cmd::prelude::*; // Add methods on commands
use predicates::prelude::*;
use std::path::PathBuf;
use std::process::Command; // Run programs
use tempfile;
type STDRESULT = Result<(),Box<dyn std::error::Error>>;

fn mutate_to(seed: &str, in_path: &PathBuf, out_path: &PathBuf) -> STDRESULT {
    let mut cmd = Command::cargo_bin("atncodec")?;
    cmd.arg("mutate")
        .arg("-s").arg(seed)
        .arg("-i").arg(in_path)
        .arg("-o").arg(out_path)
        .assert()
        .success();
    Ok(())
}

#[test]
fn mutation_is_reproducible() -> STDRESULT {
    let temp_dir = tempfile::tempdir()?;
    let in_path = temp_dir.path().join("chromosome.bin");
    std::fs::write(&in_path, [0x47u8, 0x9a, 0x12, 0x34, 0x56, 0x78])?;
    let out1 = temp_dir.path().join("first.bin");
    let out2 = temp_dir.path().join("second.bin");
    mutate_to("42", &in_path, &out1)?;
    mutate_to("42", &in_path, &out2)?;
    let first = std::fs::read(&out1)?;
    assert_eq!(first, std::fs::read(&out2)?);
    assert!(!first.is_empty());
    Ok(())
}

#[test]
fn mutating_an_empty_chromosome_is_a_no_op() -> STDRESULT {
    let temp_dir = tempfile::tempdir()?;
    let in_path = temp_dir.path().join("empty.bin");
    std::fs::write(&in_path, [])?;
    let out_path = temp_dir.path().join("out.bin");
    mutate_to("7", &in_path, &out_path)?;
    assert_eq!(std::fs::read(&out_path)?, Vec::<u8>::new());
    Ok(())
}

#[test]
fn crossover_concatenates_with_an_empty_parent() -> STDRESULT {
    let temp_dir = tempfile::tempdir()?;
    let a_path = temp_dir.path().join("a.bin");
    let b_path = temp_dir.path().join("b.bin");
    std::fs::write(&a_path, [1u8, 2, 3])?;
    std::fs::write(&b_path, [])?;
    let out_path = temp_dir.path().join("child.bin");
    let mut cmd = Command::cargo_bin("atncodec")?;
    cmd.arg("crossover")
        .arg("-s").arg("7")
        .arg("-a").arg(&a_path)
        .arg("-b").arg(&b_path)
        .arg("-o").arg(&out_path)
        .assert()
        .success();
    assert_eq!(std::fs::read(&out_path)?, vec![1u8, 2, 3]);
    Ok(())
}

#[test]
fn missing_input_fails_with_a_diagnostic() -> STDRESULT {
    let temp_dir = tempfile::tempdir()?;
    let mut cmd = Command::cargo_bin("atncodec")?;
    cmd.arg("mutate")
        .arg("-s").arg("1")
        .arg("-i").arg(temp_dir.path().join("does_not_exist.bin"))
        .arg("-o").arg(temp_dir.path().join("out.bin"))
        .assert()
        .failure()
        .stderr(predicate::str::is_empty().not());
    Ok(())
}
