use crate::api;
use crate::cell::Cell;
use crate::config::ModelConfig;
use crate::exec::{drive_to_sink, ExecutionStatus};
use crate::sink::{DisplaySink, FileReader};
use crate::transcript::images::prepare_for_dispatch;
use crate::transcript::{build_transcript, collapse_transcript};
use tokio_util::sync::CancellationToken;

/// Execute one cell end to end: build the transcript from the ordered cell
/// list, collapse and truncate it under the model's token budget, hand it to
/// the configured back-end, and drive the resulting stream into the display
/// sink until a terminal state.
///
/// Configuration problems (including the `none` sentinel for an unknown
/// model) surface as a warning and terminate before any network call. All
/// file I/O (include directives, local inline images) happens here, before
/// dispatch, never interleaved with streaming.
pub async fn execute_cell(
    cells: &[Cell],
    config: &ModelConfig,
    files: &dyn FileReader,
    sink: &mut dyn DisplaySink,
    cancel: CancellationToken,
) -> ExecutionStatus {
    if let Err(error) = config.validate() {
        sink.warn(&format!("{error:#}"));
        return ExecutionStatus::Failed;
    }

    let transcript = build_transcript(cells, files, sink);
    let collapsed =
        collapse_transcript(transcript, config.truncate_tokens, config.truncate_sys_prompt);
    let prepared = prepare_for_dispatch(collapsed, config.api, files, sink);

    let mut handle = match api::dispatch(prepared, config) {
        Ok(handle) => handle,
        Err(error) => {
            sink.warn(&format!("{error:#}"));
            return ExecutionStatus::Failed;
        }
    };

    drive_to_sink(&mut handle, sink, &cancel).await
}
