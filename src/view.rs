use serde::Serialize;

/// Read-only summary handed to the rendering layer after every mutation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ViewState {
    pub enabled: bool,
    pub callsign: String,
    pub from: String,
    pub to: String,
    pub message: String,
}

impl ViewState {
    pub fn disabled() -> Self {
        Self::default()
    }

    /// One-line rendering used by the console host.
    pub fn summary(&self) -> String {
        if !self.enabled {
            return "follow off".to_string();
        }
        let from = if self.from.is_empty() { "----" } else { &self.from };
        let to = if self.to.is_empty() { "----" } else { &self.to };
        let mut line = format!("follow {} {} -> {}", self.callsign, from, to);
        if !self.message.is_empty() {
            line.push_str(&format!(" ({})", self.message));
        }
        line
    }
}
