use anyhow::Result;
use etcetera::{choose_app_strategy, AppStrategy};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::message::Message;
use crate::config::APP_STRATEGY;

/// Where session histories live by default. Nothing is created here;
/// [`persist_messages`] creates parent directories when it writes.
pub fn session_dir() -> Result<PathBuf> {
    Ok(choose_app_strategy(APP_STRATEGY.clone())?.in_data_dir("sessions"))
}

/// Read a JSONL history. A missing file is an empty history; blank lines are skipped.
pub fn read_messages(path: &Path) -> Result<Vec<Message>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    BufReader::new(file)
        .lines()
        .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
        .map(|line| Ok(serde_json::from_str(&line?)?))
        .collect()
}

/// Replace the file at `path` with one JSON message per line
pub fn persist_messages(path: &Path, messages: &[Message]) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    let mut out = BufWriter::new(File::create(path)?);
    for message in messages {
        serde_json::to_writer(&mut out, message)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}
