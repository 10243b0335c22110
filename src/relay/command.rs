//! Slash-command parsing.

pub const HELP_TEXT: &str = "\
Send text, photos, voice notes, videos or PDF/text documents and I'll pass them to Gemini.

/start - check the bot is online
/reset - clear the conversation
/translate - toggle translate mode
/lang <language> - pick the translate language
/image <description> - generate an image
/usage - show today's usage
/help - this message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Reset,
    Translate,
    Lang(String),
    Usage,
    Image(String),
    Unknown(String),
}

impl Command {
    /// Parse `text` if it starts with a command.
    ///
    /// Commands addressed to another bot (`/reset@other_bot`) are ignored.
    pub fn parse(text: &str, bot_username: Option<&str>) -> Option<Self> {
        let rest = text.trim_start().strip_prefix('/')?;
        let (head, args) = match rest.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (rest, ""),
        };
        let (name, target) = match head.split_once('@') {
            Some((name, target)) => (name, Some(target)),
            None => (head, None),
        };
        if name.is_empty() {
            return None;
        }
        if let (Some(target), Some(me)) = (target, bot_username)
            && !target.eq_ignore_ascii_case(me)
        {
            return None;
        }

        let command = match name.to_lowercase().as_str() {
            "start" => Self::Start,
            "help" => Self::Help,
            "reset" => Self::Reset,
            "translate" => Self::Translate,
            "lang" => Self::Lang(args.to_string()),
            "usage" => Self::Usage,
            "image" => Self::Image(args.to_string()),
            other => Self::Unknown(other.to_string()),
        };
        Some(command)
    }
}
