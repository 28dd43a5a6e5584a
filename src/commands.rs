//! Command execution.

use crate::Commands;
use colored::Colorize;
use proglog_store::{
    repair_store, verify_store, FrameScanner, ScanReport, Store, StoreConfig, StoreError,
    TailRecovery,
};
use std::io::Read;
use std::path::Path;

/// Maximum characters of a payload shown by `scan`.
const PREVIEW_CHARS: usize = 60;

/// Formatted result of a command.
pub struct CommandOutput {
    pub text: String,
    /// False when the command completed but found a problem (e.g. a torn tail).
    pub ok: bool,
}

impl CommandOutput {
    fn ok(text: String) -> Self {
        Self { text, ok: true }
    }
}

/// Executes a command and returns the formatted output.
pub fn execute(
    cmd: Commands,
    config: &StoreConfig,
) -> Result<CommandOutput, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Append {
            file,
            payloads,
            stdin,
        } => {
            let payloads = if stdin {
                let mut buf = Vec::new();
                std::io::stdin().read_to_end(&mut buf)?;
                vec![buf]
            } else {
                payloads.into_iter().map(String::into_bytes).collect()
            };
            if payloads.is_empty() {
                return Err("no payloads given (pass payloads or --stdin)".into());
            }

            let store = open_store(&file, config.clone())?;
            let mut lines = Vec::with_capacity(payloads.len());
            for payload in &payloads {
                let (written, offset) = store.append(payload)?;
                lines.push(format!(
                    "{} {} bytes at offset {}",
                    "Appended".green(),
                    written,
                    offset.to_string().cyan()
                ));
            }
            store.close()?;
            Ok(CommandOutput::ok(lines.join("\n")))
        }

        Commands::Read { file, offset, hex } => {
            let store = open_read_only(&file, config)?;
            let payload = store.read(offset)?;
            store.close()?;
            Ok(CommandOutput::ok(render_payload(&payload, hex)))
        }

        Commands::Scan {
            file,
            limit,
            json,
            hex,
        } => {
            let mut lines = Vec::new();
            let mut ok = true;
            for frame in FrameScanner::open(&file)?.take(limit.unwrap_or(usize::MAX)) {
                match frame {
                    Ok(frame) => {
                        let shown = preview(&frame.payload, hex);
                        if json {
                            lines.push(
                                serde_json::json!({
                                    "offset": frame.offset,
                                    "length": frame.payload.len(),
                                    "payload": shown,
                                })
                                .to_string(),
                            );
                        } else {
                            lines.push(format!(
                                "{:>12} {:>10}  {}",
                                frame.offset.to_string().cyan(),
                                frame.payload.len(),
                                shown
                            ));
                        }
                    }
                    Err(e) => {
                        ok = false;
                        tracing::warn!("Scan of {} stopped: {}", file.display(), e);
                        if !json {
                            lines.push(format!("{}: {}", "Torn tail".yellow(), e));
                        }
                    }
                }
            }
            if lines.is_empty() && !json {
                lines.push("No frames".yellow().to_string());
            }
            Ok(CommandOutput {
                text: lines.join("\n"),
                ok,
            })
        }

        Commands::Verify { file } => {
            let report = verify_store(&file)?;
            let ok = report.is_clean();
            Ok(CommandOutput {
                text: format_report(&report),
                ok,
            })
        }

        Commands::Repair { file } => {
            let report = repair_store(&file)?;
            Ok(CommandOutput::ok(format_report(&report)))
        }

        Commands::Stat { file, json } => {
            let store = open_read_only(&file, config)?;
            let path = store.path().display().to_string();
            let flush_policy = store.config().flush_policy;
            let size = store.size();
            let frames = store.frame_count();
            store.close()?;

            let text = if json {
                serde_json::json!({
                    "path": path,
                    "size": size,
                    "frames": frames,
                    "flush_policy": format!("{:?}", flush_policy),
                })
                .to_string()
            } else {
                format!(
                    "{}\n  size:   {} bytes\n  frames: {}\n  flush:  {:?}",
                    path.bold(),
                    size,
                    frames,
                    flush_policy
                )
            };
            Ok(CommandOutput::ok(text))
        }
    }
}

/// Opens a store, pointing at `repair` when the file ends in a torn frame.
fn open_store(file: &Path, config: StoreConfig) -> Result<Store, Box<dyn std::error::Error>> {
    Store::open_with_config(file, config).map_err(|e| -> Box<dyn std::error::Error> {
        match e {
            StoreError::CorruptFrame { .. } => format!(
                "{} (run `proglog repair {}` to truncate the torn tail)",
                e,
                file.display()
            )
            .into(),
            e => e.into(),
        }
    })
}

/// Opens an existing store for a command that must not change the file.
///
/// A missing file is not created and a torn tail is never truncated,
/// whatever the configured tail recovery.
fn open_read_only(
    file: &Path,
    config: &StoreConfig,
) -> Result<Store, Box<dyn std::error::Error>> {
    if !file.is_file() {
        return Err(format!("store file not found: {}", file.display()).into());
    }
    open_store(file, config.clone().with_tail_recovery(TailRecovery::Fail))
}

/// Renders a whole payload for `read`.
fn render_payload(payload: &[u8], hex: bool) -> String {
    if hex {
        hex::encode(payload)
    } else {
        String::from_utf8_lossy(payload).into_owned()
    }
}

/// Renders the start of a payload for `scan`.
fn preview(payload: &[u8], hex: bool) -> String {
    if hex {
        let shown = &payload[..payload.len().min(PREVIEW_CHARS / 2)];
        let mut out = hex::encode(shown);
        if shown.len() < payload.len() {
            out.push_str("...");
        }
        return out;
    }

    let text = String::from_utf8_lossy(payload);
    let mut out: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        out.push_str("...");
    }
    out
}

fn format_report(report: &ScanReport) -> String {
    let status = if report.repaired {
        "Repaired".yellow()
    } else if report.is_clean() {
        "Clean".green()
    } else {
        "Torn tail".red()
    };
    format!(
        "{}\n  frames:          {}\n  payload bytes:   {}\n  valid length:    {}\n  file length:     {}\n  bytes truncated: {}",
        status,
        report.frames,
        report.payload_bytes,
        report.valid_len,
        report.file_len,
        report.bytes_truncated
    )
}
