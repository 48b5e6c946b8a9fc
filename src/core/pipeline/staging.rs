use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD};

use crate::{
    constants::{APPEND_CHUNK_SCRIPT, DECODE_FILE_SCRIPT, STAGE_CHUNK_BYTES, WRITE_CHUNK_SCRIPT},
    core::{
        domain::ExecOutcome, errors::EngineError, exec::BoundedRunner, sandbox::SandboxInstance,
    },
};

/// Writes `content` byte-for-byte to `dest` inside the sandbox.
///
/// The content is base64 encoded, shipped in chunks as positional shell
/// parameters, appended to `<dest>.b64` and decoded in place. Returns the
/// first outcome that did not succeed, or the outcome of the decode step.
pub async fn stage_file(
    runner: &BoundedRunner,
    sandbox: &SandboxInstance,
    content: &[u8],
    dest: &str,
    limit: Duration,
    max_output_bytes: usize,
) -> Result<ExecOutcome, EngineError> {
    let encoded = STANDARD.encode(content);
    let scratch = format!("{dest}.b64");

    for (idx, chunk) in encoded_chunks(&encoded).into_iter().enumerate() {
        let script = if idx == 0 {
            WRITE_CHUNK_SCRIPT
        } else {
            APPEND_CHUNK_SCRIPT
        };
        let outcome = runner
            .run(
                sandbox,
                &shell(script, &[chunk, &scratch]),
                limit,
                max_output_bytes,
            )
            .await?;
        if !outcome.succeeded() {
            tracing::debug!(dest, chunk = idx, status = ?outcome.status, "Staging chunk failed");
            return Ok(outcome);
        }
    }

    runner
        .run(
            sandbox,
            &shell(DECODE_FILE_SCRIPT, &[&scratch, dest]),
            limit,
            max_output_bytes,
        )
        .await
}

/// Splits base64 text into argument-sized pieces. Empty content still yields
/// one (empty) chunk so the destination file gets created.
pub fn encoded_chunks(encoded: &str) -> Vec<&str> {
    if encoded.is_empty() {
        return vec![""];
    }
    // base64 is ASCII, so any byte offset is a char boundary
    (0..encoded.len())
        .step_by(STAGE_CHUNK_BYTES)
        .map(|start| &encoded[start..(start + STAGE_CHUNK_BYTES).min(encoded.len())])
        .collect()
}

/// `sh -c <script> sh <args...>`: arguments land in `$1..$n` and are never
/// parsed as shell syntax.
pub fn shell(script: &str, args: &[&str]) -> Vec<String> {
    ["sh", "-c", script, "sh"]
        .iter()
        .chain(args.iter())
        .map(|part| part.to_string())
        .collect()
}
