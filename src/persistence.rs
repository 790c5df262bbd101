//! File-based persistence
//!
//! The storage format is a thin collaborator, specified here only at the wire-format
//! level needed for the round-trip testable property: each [`Step`] serializes to a
//! single text file whose first lines are script-comment metadata, followed by the
//! script body verbatim; a [`Sequence`] serializes to a directory of such files named
//! `step_NNN_<type>.lua` in order.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::sequence::Sequence;
use crate::step::{Step, StepType};
use crate::time;
use crate::variable_name::VariableName;

const COMMENT_PREFIX: &str = "-- ";
const ESCAPED_CHARS: &[char] = &['/', '\\', ':', '?', '*', '"', '\'', '<', '>', '|', '$', '&'];

/// Percent-hex-escape the character set the format reserves: `/ \ : ? * " ' < > | $ &`
/// and bytes ≤ 0x20.
pub fn escape_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for byte in label.bytes() {
        if byte <= 0x20 || byte >= 0x80 || ESCAPED_CHARS.contains(&(byte as char)) {
            out.push_str(&format!("%{byte:02X}"));
        } else {
            out.push(byte as char);
        }
    }
    out
}

/// Reverse [`escape_label`].
pub fn unescape_label(escaped: &str) -> String {
    let bytes = escaped.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&escaped[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn timeout_to_string(timeout: Option<std::time::Duration>) -> String {
    match timeout {
        None => "infinity".to_string(),
        Some(d) => d.as_millis().to_string(),
    }
}

fn timeout_from_string(s: &str) -> Option<std::time::Duration> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("infinity") {
        None
    } else {
        s.parse::<u64>().ok().map(std::time::Duration::from_millis)
    }
}

/// Serialize `step` to a single text file at `path`.
pub fn save_step(step: &Step, path: &Path) -> Result<()> {
    let mut file = fs::File::create(path)?;

    writeln!(file, "{COMMENT_PREFIX}type: {}", step.step_type().as_str())?;
    writeln!(file, "{COMMENT_PREFIX}label: {}", step.label())?;
    let names = step
        .used_variable_names()
        .iter()
        .map(VariableName::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    writeln!(file, "{COMMENT_PREFIX}use context variable names: {names}")?;
    writeln!(
        file,
        "{COMMENT_PREFIX}time of last modification: {}",
        time::to_string(step.last_modification_time())
    )?;
    if let Some(t) = step.last_execution_time() {
        writeln!(file, "{COMMENT_PREFIX}time of last execution: {}", time::to_string(t))?;
    } else {
        writeln!(file, "{COMMENT_PREFIX}time of last execution: never")?;
    }
    writeln!(file, "{COMMENT_PREFIX}timeout: {}", timeout_to_string(step.timeout()))?;
    file.write_all(step.script().as_bytes())?;
    Ok(())
}

/// Parse a single metadata line of the form `-- key: value`.
fn parse_meta_line(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix(COMMENT_PREFIX)?;
    let (key, value) = rest.split_once(':')?;
    Some((key.trim(), value.trim()))
}

/// Load a single step from a text file previously written by [`save_step`].
pub fn load_step(path: &Path) -> Result<Step> {
    let contents = fs::read_to_string(path)?;
    let mut lines = contents.split_inclusive('\n');

    let mut step_type = StepType::Action;
    let mut label = String::new();
    let mut names: Vec<VariableName> = Vec::new();
    let mut last_modification = time::now();
    let mut last_execution: Option<time::TimePoint> = None;
    let mut timeout: Option<std::time::Duration> = None;

    let mut consumed = 0usize;
    for line in lines.by_ref() {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        let Some((key, value)) = parse_meta_line(trimmed) else {
            break;
        };
        consumed += line.len();
        match key {
            "type" => step_type = StepType::from_str(value).unwrap_or(StepType::Action),
            "label" => label = value.to_string(),
            "use context variable names" => {
                names = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .filter_map(|s| VariableName::new(s).ok())
                    .collect();
            }
            "time of last modification" => {
                last_modification = time::parse(value).unwrap_or_else(time::now);
            }
            "time of last execution" => {
                last_execution = time::parse(value);
            }
            "timeout" => timeout = timeout_from_string(value),
            _ => {}
        }
    }

    let script = contents[consumed..].to_string();

    let mut step = Step::new(step_type);
    step.set_script_preserving_timestamp(script);
    step.set_label(label);
    step.set_used_variable_names(names.into_iter().collect());
    step.set_last_modification_time(last_modification);
    step.set_last_execution_time(last_execution);
    step.set_timeout(timeout);
    Ok(step)
}

fn step_file_name(index: usize, step_type: StepType) -> String {
    format!("step_{index:03}_{}.lua", step_type.as_str())
}

/// Name of the sequence-level manifest file: a small header (sequence timeout) followed
/// by the step-setup script body verbatim, in the same comment-header-then-body shape
/// as a step file. Named with a leading underscore so it sorts before every `step_NNN_*`
/// file and is easy to filter out when loading steps back.
const SETUP_FILE_NAME: &str = "_setup.lua";

/// Serialize `seq` as a directory (named after its escaped label) under `root`.
pub fn save_sequence(seq: &Sequence, root: &Path) -> Result<PathBuf> {
    let dir = root.join(escape_label(seq.label()));
    fs::create_dir_all(&dir)?;

    let mut manifest = fs::File::create(dir.join(SETUP_FILE_NAME))?;
    writeln!(manifest, "{COMMENT_PREFIX}timeout: {}", timeout_to_string(seq.timeout()))?;
    manifest.write_all(seq.step_setup_script().as_bytes())?;

    for (i, step) in seq.steps().iter().enumerate() {
        let path = dir.join(step_file_name(i, step.step_type()));
        save_step(step, &path)?;
    }
    Ok(dir)
}

/// Load a sequence previously written by [`save_sequence`]. The sequence's label is
/// taken from the (unescaped) directory name.
pub fn load_sequence(dir: &Path) -> Result<Sequence> {
    let label = dir
        .file_name()
        .and_then(|n| n.to_str())
        .map(unescape_label)
        .ok_or_else(|| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, "sequence directory has no name")))?;

    let mut seq = Sequence::new(label);

    let manifest_path = dir.join(SETUP_FILE_NAME);
    if manifest_path.is_file() {
        let contents = fs::read_to_string(&manifest_path)?;
        let mut consumed = 0usize;
        for line in contents.split_inclusive('\n') {
            let trimmed = line.trim_end_matches(['\n', '\r']);
            let Some((key, value)) = parse_meta_line(trimmed) else {
                break;
            };
            consumed += line.len();
            if key == "timeout" {
                seq.set_timeout(timeout_from_string(value));
            }
        }
        seq.set_step_setup_script(contents[consumed..].to_string());
    }

    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|e| e == "lua").unwrap_or(false))
        .filter(|p| p.file_name().and_then(|n| n.to_str()).map(|n| n.starts_with("step_")).unwrap_or(false))
        .collect();
    entries.sort();

    for path in entries {
        seq.push_step(load_step(&path)?);
    }
    Ok(seq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn escape_then_unescape_round_trips() {
        let label = "a/b:c d";
        let escaped = escape_label(label);
        assert_eq!(unescape_label(&escaped), label);
    }

    #[test]
    fn step_round_trips_through_a_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("step_000_action.lua");

        let mut step = Step::new(StepType::Action);
        step.set_script("sum = a + b");
        step.set_label("add two numbers");
        step.set_used_variable_names(
            [VariableName::new("a").unwrap(), VariableName::new("b").unwrap(), VariableName::new("sum").unwrap()]
                .into_iter()
                .collect(),
        );
        step.set_timeout(Some(std::time::Duration::from_millis(1500)));
        let stamp = step.last_modification_time();

        save_step(&step, &path).unwrap();
        let loaded = load_step(&path).unwrap();

        assert_eq!(loaded.step_type(), step.step_type());
        assert_eq!(loaded.label(), step.label());
        assert_eq!(loaded.script(), step.script());
        assert_eq!(loaded.used_variable_names(), step.used_variable_names());
        assert_eq!(loaded.timeout(), step.timeout());
        assert_eq!(
            loaded.last_modification_time().format("%Y-%m-%d %H:%M:%S").to_string(),
            stamp.format("%Y-%m-%d %H:%M:%S").to_string()
        );
    }

    #[test]
    fn sequence_round_trips_through_a_directory() {
        let dir = tempdir().unwrap();

        let mut seq = Sequence::new("my/sequence");
        seq.set_step_setup_script("math.randomseed(1)");
        seq.set_timeout(Some(std::time::Duration::from_secs(30)));
        let mut step1 = Step::new(StepType::If);
        step1.set_script("return x > 0");
        seq.push_step(step1);
        let mut step2 = Step::new(StepType::Action);
        step2.set_script("y = 1");
        seq.push_step(step2);
        seq.push_step(Step::new(StepType::End));

        let saved_dir = save_sequence(&seq, dir.path()).unwrap();
        let loaded = load_sequence(&saved_dir).unwrap();

        assert_eq!(loaded.label(), seq.label());
        assert_eq!(loaded.len(), seq.len());
        assert_eq!(loaded.step_setup_script(), seq.step_setup_script());
        assert_eq!(loaded.timeout(), seq.timeout());
        for (a, b) in loaded.steps().iter().zip(seq.steps()) {
            assert_eq!(a.step_type(), b.step_type());
            assert_eq!(a.script(), b.script());
        }
    }

    #[test]
    fn sequence_without_an_explicit_timeout_loads_with_none() {
        let dir = tempdir().unwrap();
        let seq = Sequence::new("bare");
        let saved_dir = save_sequence(&seq, dir.path()).unwrap();
        let loaded = load_sequence(&saved_dir).unwrap();
        assert_eq!(loaded.timeout(), None);
        assert!(loaded.step_setup_script().is_empty());
    }

    #[test]
    fn no_timeout_persists_as_the_infinity_literal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("step_000_action.lua");

        let step = Step::new(StepType::Action);
        save_step(&step, &path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("timeout: infinity"));
    }
}
