//! Opening a run against the CSV files: either fresh or resumed from a
//! loaded checkpoint. Whether to resume is the caller's decision.

use std::path::Path;

use tracing::info;

use enricher_shared::{CheckpointState, CsvConfig, EnricherError, RecordSource, Result};
use enricher_storage::{CheckpointStore, CsvOutputSink, CsvRecordSource};

/// Discard any checkpoint, recreate the output, and persist an empty checkpoint
/// that pins the output header and the input fingerprint.
pub fn start_fresh(
    source: &CsvRecordSource,
    store: &mut CheckpointStore,
    output: &Path,
    csv: &CsvConfig,
) -> Result<(CsvOutputSink, CheckpointState)> {
    store.discard()?;
    let sink = CsvOutputSink::create(output, source.header(), csv)?;
    let state = CheckpointState::fresh(source.fingerprint(), sink.committed());
    store.persist(&state)?;

    info!(run_id = %state.run_id, output = %output.display(), "starting fresh run");
    Ok((sink, state))
}

/// Continue a run from `state`, cutting the output back to what the
/// checkpoint committed.
pub fn resume(
    source: &CsvRecordSource,
    state: CheckpointState,
    output: &Path,
    csv: &CsvConfig,
) -> Result<(CsvOutputSink, CheckpointState)> {
    if state.input_fingerprint != source.fingerprint() {
        return Err(EnricherError::Checkpoint(
            "input file changed since the checkpoint was written; restart required".into(),
        ));
    }
    if let Some(total) = source.total() {
        if state.next_index() > total {
            return Err(EnricherError::Checkpoint(format!(
                "checkpoint is at record {} but the input has only {total}",
                state.next_index()
            )));
        }
    }

    let sink = CsvOutputSink::resume(output, state.output_offset, csv)?;
    info!(
        run_id = %state.run_id,
        next_index = state.next_index(),
        processed = state.counters.processed,
        "resuming run"
    );
    Ok((sink, state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use enricher_shared::{EnrichmentStatus, TextEncoding};
    use std::path::PathBuf;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("enricher-session-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn csv() -> CsvConfig {
        CsvConfig {
            encoding: TextEncoding::Utf8,
            ..CsvConfig::default()
        }
    }

    fn source(text: &str) -> CsvRecordSource {
        CsvRecordSource::from_text(text, &csv(), enricher_storage::fingerprint(text.as_bytes()))
            .unwrap()
    }

    const INPUT: &str = "ID_AVO;NOM;PRENOM1\nA1;MARTIN;Paul\nA2;DURAND;Lea\n";

    #[test]
    fn fresh_start_persists_empty_checkpoint() {
        let dir = temp_dir();
        let mut store = CheckpointStore::new(dir.join("checkpoint.json"));
        let (sink, state) = start_fresh(&source(INPUT), &mut store, &dir.join("out.csv"), &csv()).unwrap();

        assert_eq!(state.output_offset, sink.committed());
        let loaded = CheckpointStore::new(dir.join("checkpoint.json")).load().unwrap().unwrap();
        assert_eq!(loaded.run_id, state.run_id);
        assert_eq!(loaded.last_processed_index, None);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn resume_refuses_different_input() {
        let dir = temp_dir();
        let mut store = CheckpointStore::new(dir.join("checkpoint.json"));
        let output = dir.join("out.csv");
        let (_, state) = start_fresh(&source(INPUT), &mut store, &output, &csv()).unwrap();

        let changed = source("ID_AVO;NOM;PRENOM1\nA1;MARTIN;Paul\n");
        let err = resume(&changed, state.clone(), &output, &csv()).unwrap_err();
        assert!(err.to_string().contains("input file changed"));

        resume(&source(INPUT), state, &output, &csv()).unwrap();

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn resume_refuses_checkpoint_past_end() {
        let dir = temp_dir();
        let mut store = CheckpointStore::new(dir.join("checkpoint.json"));
        let output = dir.join("out.csv");
        let (_, mut state) = start_fresh(&source(INPUT), &mut store, &output, &csv()).unwrap();
        state.advance(4, "A5", EnrichmentStatus::Found, state.output_offset).unwrap();

        let err = resume(&source(INPUT), state, &output, &csv()).unwrap_err();
        assert!(matches!(err, EnricherError::Checkpoint(_)));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
