use chatgate_protocol::openai::ChatMessage;

/// Flattens an OpenAI message list into the single prompt string the vendor
/// web chats accept.
///
/// A lone user turn (optionally preceded by system messages) is sent as-is
/// with the system text prepended; longer conversations are rendered as
/// role-tagged blocks.
pub fn build_prompt(messages: &[ChatMessage]) -> String {
    let (system, rest): (Vec<&ChatMessage>, Vec<&ChatMessage>) =
        messages.iter().partition(|message| message.role == "system");

    if let [only] = rest.as_slice()
        && only.role == "user"
    {
        let user = only.content.text();
        if system.is_empty() {
            return user;
        }
        let system = system
            .iter()
            .map(|message| message.content.text())
            .collect::<Vec<_>>()
            .join("\n");
        return format!("{system}\n\n{user}");
    }

    messages
        .iter()
        .map(|message| format!("{}\n{}", role_tag(&message.role), message.content.text()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn role_tag(role: &str) -> &'static str {
    match role {
        "system" => "[System]",
        "assistant" => "[Assistant]",
        _ => "[User]",
    }
}

#[cfg(test)]
mod tests {
    use chatgate_protocol::openai::MessageContent;

    use super::*;

    fn message(role: &str, text: &str) -> ChatMessage {
        ChatMessage {
            role: role.to_string(),
            content: MessageContent::Text(text.to_string()),
        }
    }

    #[test]
    fn single_user_turn_is_sent_verbatim() {
        assert_eq!(build_prompt(&[message("user", "hi")]), "hi");
        assert_eq!(
            build_prompt(&[message("system", "a"), message("system", "b"), message("user", "hi")]),
            "a\nb\n\nhi"
        );
    }

    #[test]
    fn conversations_are_role_tagged() {
        let prompt = build_prompt(&[
            message("system", "be brief"),
            message("user", "hi"),
            message("assistant", "hello"),
            message("user", "again"),
        ]);
        assert_eq!(
            prompt,
            "[System]\nbe brief\n\n[User]\nhi\n\n[Assistant]\nhello\n\n[User]\nagain"
        );
    }
}
