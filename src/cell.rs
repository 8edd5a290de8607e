use serde::{Deserialize, Serialize};

/// What a notebook cell contributes to the conversation. `Other` cells are
/// skipped by the transcript builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CellKind {
    SystemPrompt,
    Prompt,
    Markdown,
    Other,
}

/// One mime-tagged payload inside a cell output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputItem {
    pub mime: String,
    #[serde(with = "serde_bytes_b64")]
    pub data: Vec<u8>,
}

impl OutputItem {
    pub fn markdown(text: impl Into<String>) -> Self {
        Self {
            mime: "text/markdown".to_string(),
            data: text.into().into_bytes(),
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    pub fn is_text(&self) -> bool {
        self.mime.starts_with("text/")
    }

    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }
}

/// One prior execution output: an ordered list of mime-tagged items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellOutput {
    pub items: Vec<OutputItem>,
}

/// Read-only view of one notebook cell as supplied by the host. The host owns
/// the document model; the builder only walks this snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pub kind: CellKind,
    pub text: String,
    #[serde(default)]
    pub outputs: Vec<CellOutput>,
    /// True for the cell being executed. Prior outputs of the last cell are
    /// not replayed into the transcript; they are about to be replaced.
    #[serde(default)]
    pub is_last: bool,
}

impl Cell {
    pub fn new(kind: CellKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            outputs: Vec::new(),
            is_last: false,
        }
    }

    pub fn with_output(mut self, items: Vec<OutputItem>) -> Self {
        self.outputs.push(CellOutput { items });
        self
    }

    pub fn last(mut self) -> Self {
        self.is_last = true;
        self
    }
}

/// Output payloads cross the host boundary as base64 inside JSON.
mod serde_bytes_b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
