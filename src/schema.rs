// src/schema.rs

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use channel_signal::NormalizedEvent;
use schemars::schema_for;

use crate::output::MessageInParams;

pub const EVENT_SCHEMA_FILE: &str = "normalized-event.schema.json";
pub const MESSAGE_IN_SCHEMA_FILE: &str = "message-in.schema.json";

/// Entry point for `signal-relay schema`. Returns the files written.
pub fn write_schema(out_dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("cannot create {}", out_dir.display()))?;

    let event_path = out_dir.join(EVENT_SCHEMA_FILE);
    let event_json = serde_json::to_string_pretty(&schema_for!(NormalizedEvent))?;
    fs::write(&event_path, event_json)?;

    let message_in_path = out_dir.join(MESSAGE_IN_SCHEMA_FILE);
    let message_in_json = serde_json::to_string_pretty(&schema_for!(MessageInParams))?;
    fs::write(&message_in_path, message_in_json)?;

    Ok(vec![event_path, message_in_path])
}
