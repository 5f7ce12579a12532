//! Dump command implementation.

use iprop_core::bytes::ByteReader;
use iprop_core::{
    Direction, IterControl, LockMode, LogConfig, LogContext, LogResult, ModifyMask, NopKind,
    OpCode, Principal, RecordMeta, Scope, UberPayload,
};
use serde::Serialize;

/// Log record representation for output.
#[derive(Debug, Serialize)]
pub struct RecordInfo {
    /// Offset of the record's header.
    pub offset: u64,
    /// Record version (nominal version for the uber record).
    pub version: u32,
    /// Record timestamp, seconds since the epoch.
    pub timestamp: u32,
    /// Operation name.
    pub op: String,
    /// Payload length in bytes.
    pub len: u32,
    /// Whether the confirmed marker covers this record.
    pub confirmed: bool,
    /// Principal named by a delete or rename.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    /// Attribute mask of a modify, in hex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,
    /// Nop kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nop_kind: Option<String>,
    /// Confirmed end offset stored in the uber record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_offset: Option<u64>,
}

/// Runs the dump command.
pub fn run(
    config: &LogConfig,
    limit: Option<usize>,
    unconfirmed: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut ctx = super::open_log(config, LockMode::Shared)?;
    let records = read_records(&mut ctx, limit, unconfirmed)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            print_text_output(&records);
        }
    }

    Ok(())
}

/// Walks the log forward, describing each record.
pub fn read_records(
    ctx: &mut LogContext,
    limit: Option<usize>,
    unconfirmed: bool,
) -> LogResult<Vec<RecordInfo>> {
    let confirmed_end = ctx.goto_logical_end()?;
    let scope = if unconfirmed {
        Scope::All
    } else {
        Scope::ConfirmedOnly
    };
    let max_records = limit.unwrap_or(usize::MAX);
    let mut records = Vec::new();

    ctx.for_each(Direction::Forward, scope, |ctx, meta| {
        if records.len() >= max_records {
            return Ok(IterControl::Stop);
        }
        let payload = ctx.read_payload(meta)?;
        records.push(describe(meta, &payload, meta.end_offset() <= confirmed_end));
        Ok(IterControl::Continue)
    })?;

    Ok(records)
}

fn describe(meta: &RecordMeta, payload: &[u8], confirmed: bool) -> RecordInfo {
    let mut info = RecordInfo {
        offset: meta.offset,
        version: meta.version().as_u32(),
        timestamp: meta.timestamp().as_u32(),
        op: meta.op().name().to_string(),
        len: meta.len(),
        confirmed,
        principal: None,
        mask: None,
        nop_kind: None,
        next_offset: None,
    };

    match meta.op() {
        OpCode::Nop if meta.is_uber() => {
            if let Ok(uber) = UberPayload::decode(payload) {
                info.op = "uber".to_string();
                info.version = uber.last_version.as_u32();
                info.next_offset = Some(uber.next_offset);
            }
        }
        OpCode::Nop => {
            let kind = match payload.len() {
                0 => Some(NopKind::Plain),
                4 => ByteReader::new(payload)
                    .u32()
                    .ok()
                    .and_then(NopKind::from_u32),
                _ => None,
            };
            info.nop_kind = Some(kind.map_or_else(|| "unknown".to_string(), |k| format!("{k:?}")));
        }
        OpCode::Delete | OpCode::Rename => {
            let mut reader = ByteReader::new(payload);
            info.principal = Principal::decode_from(&mut reader)
                .map(|p| p.to_string())
                .ok();
        }
        OpCode::Modify => {
            info.mask = ByteReader::new(payload)
                .u32()
                .ok()
                .map(|mask| ModifyMask(mask).to_string());
        }
        OpCode::Create => {}
    }
    info
}

fn print_text_output(records: &[RecordInfo]) {
    println!(
        "{:>10}  {:>8}  {:>10}  {:<8}  {:>6}  {}",
        "OFFSET", "VERSION", "TIME", "OP", "LEN", "DETAIL"
    );
    for record in records {
        let mut detail = Vec::new();
        if let Some(principal) = &record.principal {
            detail.push(principal.clone());
        }
        if let Some(mask) = &record.mask {
            detail.push(format!("mask={mask}"));
        }
        if let Some(kind) = &record.nop_kind {
            detail.push(format!("kind={kind}"));
        }
        if let Some(next) = record.next_offset {
            detail.push(format!("next={next}"));
        }
        if !record.confirmed {
            detail.push("(unconfirmed)".to_string());
        }
        println!(
            "{:>10}  {:>8}  {:>10}  {:<8}  {:>6}  {}",
            record.offset,
            record.version,
            record.timestamp,
            record.op,
            record.len,
            detail.join(" ")
        );
    }
    println!();
    println!("{} record(s)", records.len());
}
