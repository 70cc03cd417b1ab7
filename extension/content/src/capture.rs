//! Browser-independent part of the in-page agent: capture state and replies.

use selcap_protocol::Reply;

/// What the page listeners must do after a capture directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Attach,
    Detach,
    Unchanged,
}

#[derive(Debug, Default)]
pub struct Capture {
    enabled: bool,
    last_reported: String,
}

impl Capture {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) -> Transition {
        if enabled == self.enabled {
            return Transition::Unchanged;
        }
        self.enabled = enabled;
        if enabled {
            Transition::Attach
        } else {
            Transition::Detach
        }
    }

    /// Trims `selection` and returns it when it should be reported: not empty and not the
    /// last text reported.
    pub fn take_report(&mut self, selection: &str) -> Option<String> {
        let text = selection.trim();
        if text.is_empty() || text == self.last_reported {
            return None;
        }
        self.last_reported = text.to_string();
        Some(self.last_reported.clone())
    }
}

/// The selection when there is one, otherwise the page text.
pub fn page_content(selection: &str, page_text: impl FnOnce() -> String) -> Reply {
    let selection = selection.trim();
    if selection.is_empty() {
        Reply::PageContent {
            content: page_text(),
            is_selected: false,
        }
    } else {
        Reply::PageContent {
            content: selection.to_string(),
            is_selected: true,
        }
    }
}

pub fn selected_text(selection: &str) -> Reply {
    Reply::SelectedText {
        text: selection.trim().to_string(),
    }
}
