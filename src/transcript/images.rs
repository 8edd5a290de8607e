use crate::config::Api;
use crate::sink::{DisplaySink, FileReader};
use crate::types::{Content, ContentPart, ImageSource, Message, Role};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::path::Path;

/// Alt text marking an inline image whose target is already an embedded data
/// URL (e.g. one re-injected from a generated image output). Passed through
/// without touching the filesystem.
pub const EMBEDDED_IMAGE_ALT: &str = "%%ChatLLM Inline Image";

/// One `![alt](target)` reference found in message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub alt: String,
    pub target: String,
    pub start: usize,
    pub end: usize,
}

/// Scan markdown text for inline image references. Hand-rolled rather than a
/// full markdown parse: an image reference never spans lines and nesting is
/// not supported.
pub fn scan_inline_images(text: &str) -> Vec<InlineImage> {
    let mut images = Vec::new();
    let mut rest = 0;

    while let Some(offset) = text[rest..].find("![") {
        let start = rest + offset;
        let alt_start = start + 2;
        let Some(alt_len) = text[alt_start..].find(']') else {
            break;
        };
        let target_open = alt_start + alt_len + 1;
        if text[target_open..].chars().next() != Some('(') {
            rest = target_open;
            continue;
        }
        let Some(target_len) = text[target_open + 1..].find(')') else {
            break;
        };
        let end = target_open + 1 + target_len + 1;

        let alt = text[alt_start..alt_start + alt_len].to_string();
        let target = text[target_open + 1..target_open + 1 + target_len]
            .trim()
            .to_string();
        if alt.contains('\n') || target.contains('\n') {
            rest = start + 2;
            continue;
        }

        images.push(InlineImage {
            alt,
            target,
            start,
            end,
        });
        rest = end;
    }

    images
}

/// Remove inline image references, keeping the surrounding text.
pub fn strip_inline_images(text: &str) -> String {
    let images = scan_inline_images(text);
    if images.is_empty() {
        return text.to_string();
    }

    let mut stripped = String::with_capacity(text.len());
    let mut cursor = 0;
    for image in &images {
        stripped.push_str(&text[cursor..image.start]);
        cursor = image.end;
    }
    stripped.push_str(&text[cursor..]);
    stripped
}

/// Render an already-embedded image as the markdown form the scanner
/// recognizes, so a generated image can ride along as next-turn input.
pub fn embedded_image_markdown(mime: &str, data: &[u8]) -> String {
    format!(
        "![{EMBEDDED_IMAGE_ALT}](data:{mime};base64,{})",
        BASE64.encode(data)
    )
}

/// Dispatch-time image handling: multimodal back-ends get user text split
/// into ordered text/image parts, everything else gets image references
/// stripped. Runs after collapsing, before the adapter sees the transcript.
pub fn prepare_for_dispatch(
    messages: Vec<Message>,
    api: Api,
    files: &dyn FileReader,
    sink: &mut dyn DisplaySink,
) -> Vec<Message> {
    messages
        .into_iter()
        .map(|mut message| {
            if message.role != Role::User {
                return message;
            }
            let Content::Text(text) = &message.content else {
                return message;
            };

            if !api.supports_image_input() {
                let stripped = strip_inline_images(text);
                if stripped.len() != text.len() {
                    message.content = Content::Text(stripped);
                }
                return message;
            }

            if let Some(parts) = split_into_parts(text, files, sink) {
                message.content = Content::Parts(parts);
            }
            message
        })
        .collect()
}

/// Split user text around its image references. Returns `None` when there is
/// nothing to convert, leaving the message as plain text.
fn split_into_parts(
    text: &str,
    files: &dyn FileReader,
    sink: &mut dyn DisplaySink,
) -> Option<Vec<ContentPart>> {
    let images = scan_inline_images(text);
    if images.is_empty() {
        return None;
    }

    let mut parts = Vec::new();
    let mut cursor = 0;
    for image in &images {
        let leading = &text[cursor..image.start];
        if !leading.is_empty() {
            parts.push(ContentPart::Text(leading.to_string()));
        }
        if let Some(source) = resolve_image_source(image, files, sink) {
            parts.push(ContentPart::Image { source });
        }
        cursor = image.end;
    }
    let trailing = &text[cursor..];
    if !trailing.is_empty() {
        parts.push(ContentPart::Text(trailing.to_string()));
    }

    Some(parts)
}

fn resolve_image_source(
    image: &InlineImage,
    files: &dyn FileReader,
    sink: &mut dyn DisplaySink,
) -> Option<ImageSource> {
    if image.alt == EMBEDDED_IMAGE_ALT {
        match parse_data_url(&image.target) {
            Some((mime, base64)) => return Some(ImageSource::Data { mime, base64 }),
            None => {
                sink.warn("Embedded inline image has a malformed data URL");
                return None;
            }
        }
    }

    if image.target.starts_with("http://") || image.target.starts_with("https://") {
        return Some(ImageSource::Url(image.target.clone()));
    }

    match files.read(Path::new(&image.target)) {
        Ok(bytes) => Some(ImageSource::Data {
            mime: mime_for_path(&image.target),
            base64: BASE64.encode(bytes),
        }),
        Err(error) => {
            sink.warn(&format!(
                "Cannot read inline image '{}': {error:#}",
                image.target
            ));
            None
        }
    }
}

fn parse_data_url(target: &str) -> Option<(String, String)> {
    let rest = target.strip_prefix("data:")?;
    let (mime, payload) = rest.split_once(";base64,")?;
    if mime.is_empty() || payload.is_empty() {
        return None;
    }
    Some((mime.to_string(), payload.to_string()))
}

fn mime_for_path(path: &str) -> String {
    let extension = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg".to_string(),
        Some("gif") => "image/gif".to_string(),
        Some("webp") => "image/webp".to_string(),
        _ => "image/png".to_string(),
    }
}
