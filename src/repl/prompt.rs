//! Process-unique prompt token.
//!
//! Detecting "command finished" on an unframed byte stream requires a
//! prompt no ordinary program output will ever contain. A random token is
//! most of the answer; the rest is making sure the shell's own variable
//! dumps don't reproduce it: the prompt-change command embeds readline's
//! invisible markers (`\[\]`) mid-token, so `env` printing `PS1=...` shows
//! the marked form while the rendered prompt matches the clean form.

use uuid::Uuid;

pub(crate) struct PromptToken {
    token: String,
}

impl PromptToken {
    pub(crate) fn generate() -> Self {
        let raw = Uuid::new_v4().simple().to_string();
        Self {
            token: format!("BRIDGE{}", &raw[..12]),
        }
    }

    /// The primary prompt as it appears on the wire.
    pub(crate) fn primary(&self) -> String {
        format!("{}>", self.token)
    }

    /// The continuation prompt as it appears on the wire.
    pub(crate) fn continuation(&self) -> String {
        format!("{}+", self.token)
    }

    /// Shell command that installs both prompts and clears
    /// `PROMPT_COMMAND` so nothing else redraws over them.
    pub(crate) fn change_command(&self) -> String {
        let (head, tail) = self.token.split_at(self.token.len() / 2);
        format!(
            "PS1='{head}\\[\\]{tail}>' PS2='{head}\\[\\]{tail}+' PROMPT_COMMAND=''",
            head = head,
            tail = tail
        )
    }
}
