use serde::{Deserialize, Serialize};
use vttsource_mse::SourceBufferOptions;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Settings applied to every source buffer created by `replay`.
    #[serde(default)]
    pub buffer: SourceBufferOptions,

    #[serde(default)]
    pub dump: DumpSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DumpSettings {
    /// Truncate string attributes longer than this many characters.
    /// `0` disables truncation.
    #[serde(default = "default_max_string_len")]
    pub max_string_len: usize,
}

fn default_max_string_len() -> usize {
    80
}

impl Default for DumpSettings {
    fn default() -> Self {
        Self {
            max_string_len: default_max_string_len(),
        }
    }
}
