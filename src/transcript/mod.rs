pub mod collapse;
pub mod directive;
pub mod images;

pub use collapse::collapse_transcript;

use crate::cell::{Cell, CellKind};
use crate::sink::{DisplaySink, FileReader};
use crate::types::{Message, Role};
use directive::expand_directives;
use images::embedded_image_markdown;

/// Marker a detached-output markdown cell starts with; such cells re-enter
/// the transcript as assistant turns instead of user turns.
pub const CHAT_OUTPUT_MARKER: &str = "#### (Chat Output)\n";

/// Walk the ordered cell list into a flat role-tagged message sequence.
/// Directive expansion happens here, before dispatch; warnings surface
/// through the sink and never abort the build.
pub fn build_transcript(
    cells: &[Cell],
    files: &dyn FileReader,
    sink: &mut dyn DisplaySink,
) -> Vec<Message> {
    let mut messages = Vec::new();
    let mut warn = |message: String| sink.warn(&message);

    for cell in cells {
        match cell.kind {
            CellKind::SystemPrompt => {
                let text = expand_directives(&cell.text, files, &mut warn);
                messages.push(Message::text(Role::System, text));
            }
            CellKind::Prompt => {
                let text = expand_directives(&cell.text, files, &mut warn);
                messages.push(Message::text(Role::User, text));

                // Prior outputs replay as context only for earlier cells; the
                // executing cell's outputs are about to be replaced.
                if cell.is_last {
                    continue;
                }
                for output in &cell.outputs {
                    for item in &output.items {
                        if item.is_image() {
                            // A generated image becomes next-turn input: it is
                            // re-injected as an embedded inline image in a user
                            // message so dispatch-time extraction picks it up.
                            messages.push(Message::text(
                                Role::User,
                                embedded_image_markdown(&item.mime, &item.data),
                            ));
                        } else {
                            messages.push(Message::text(Role::Assistant, item.text()));
                        }
                    }
                }
            }
            CellKind::Markdown => {
                let text = expand_directives(&cell.text, files, &mut warn);
                let role = if text.starts_with(CHAT_OUTPUT_MARKER) {
                    Role::Assistant
                } else {
                    Role::User
                };
                messages.push(Message::text(role, text));
            }
            CellKind::Other => {}
        }
    }

    messages
}
