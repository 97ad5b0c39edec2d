use crate::entity::ClientId;
use crate::logging;
use crate::registry::{Chats, Clients};

/// One outbound message produced by command handling, addressed by client ID.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Reply {
    pub to: ClientId,
    pub text: String,
}

impl Reply {
    #[inline]
    pub fn new<T: Into<String>>(to: ClientId, text: T) -> Reply {
        Reply {
            to,
            text: text.into(),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Command {
    Clients,
    Connect,
    Disconnect,
    Dialog,
    Approve,
    Decline,
    Requests,
    Help,
}

impl Command {
    /// Help listing order.
    pub const ALL: [Command; 8] = [
        Command::Clients,
        Command::Connect,
        Command::Disconnect,
        Command::Dialog,
        Command::Approve,
        Command::Decline,
        Command::Requests,
        Command::Help,
    ];

    pub fn parse(name: &str) -> Option<Command> {
        match name {
            "clients" => Some(Command::Clients),
            "connect" => Some(Command::Connect),
            "disconnect" => Some(Command::Disconnect),
            "dialog" => Some(Command::Dialog),
            "approve" => Some(Command::Approve),
            "decline" => Some(Command::Decline),
            "requests" => Some(Command::Requests),
            "help" => Some(Command::Help),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::Clients => "clients",
            Command::Connect => "connect",
            Command::Disconnect => "disconnect",
            Command::Dialog => "dialog",
            Command::Approve => "approve",
            Command::Decline => "decline",
            Command::Requests => "requests",
            Command::Help => "help",
        }
    }

    pub fn arg_names(self) -> &'static [&'static str] {
        match self {
            Command::Connect | Command::Approve | Command::Decline => &["username"],
            _ => &[],
        }
    }

    #[inline]
    pub fn arity(self) -> usize {
        self.arg_names().len()
    }

    pub fn summary(self) -> &'static str {
        match self {
            Command::Clients => "Get client list for connection",
            Command::Connect => "Connect to another client",
            Command::Disconnect => "Disconnect from current dialog",
            Command::Dialog => "Show username of current dialogue partner",
            Command::Approve => "Start chat with <username>",
            Command::Decline => "Decline chat with <username>",
            Command::Requests => "Get all chat requests",
            Command::Help => "Commands list.",
        }
    }

    /// The help-listing line, e.g. `/connect <username> - Connect to another client`.
    pub fn display(self) -> String {
        let args = self
            .arg_names()
            .iter()
            .map(|arg| format!("<{}>", arg))
            .collect::<Vec<_>>()
            .join(", ");

        if args.is_empty() {
            format!("/{} - {}", self.name(), self.summary())
        } else {
            format!("/{} {} - {}", self.name(), args, self.summary())
        }
    }
}

/// The command list sent after registration and on `/help`; one message.
pub fn help_text() -> String {
    let mut text = String::from("Available commands:");

    for command in Command::ALL.iter() {
        text.push('\n');
        text.push_str(&command.display());
    }

    text
}

/// Routes one parsed command line. Every error case produces a single reply
/// to the caller and leaves the registries untouched.
pub fn dispatch(
    clients: &mut Clients,
    chats: &mut Chats,
    caller: ClientId,
    name: &str,
    args: &[String],
    log: &logging::Logger,
) -> Vec<Reply> {
    let command = match Command::parse(name) {
        Some(command) => command,
        None => {
            logging::debug!(log, "unknown command"; "client_id" => caller, "command" => name);
            return vec![Reply::new(caller, format!("Unknown command: {}.", name))];
        }
    };

    if args.len() != command.arity() {
        logging::debug!(log, "bad command arity";
                        "client_id" => caller,
                        "command" => command.name(),
                        "args" => args.len());
        return vec![Reply::new(caller, "Invalid command args.")];
    }

    match command {
        Command::Clients => list_clients(clients, caller),
        Command::Connect => connect(clients, chats, caller, &args[0], log),
        Command::Disconnect => leave_chat(clients, chats, caller),
        Command::Dialog => dialog(clients, chats, caller),
        Command::Approve => approve(clients, chats, caller, &args[0], log),
        Command::Decline => decline(clients, chats, caller, &args[0], log),
        Command::Requests => requests(clients, chats, caller),
        Command::Help => vec![Reply::new(caller, help_text())],
    }
}

fn display_name(clients: &Clients, id: ClientId) -> String {
    clients
        .get(id)
        .and_then(|client| client.name())
        .unwrap_or("")
        .to_string()
}

fn list_clients(clients: &Clients, caller: ClientId) -> Vec<Reply> {
    let names = clients.peer_names(caller);

    let text = if names.is_empty() {
        "No available clients.".to_string()
    } else {
        names.join("\n")
    };

    vec![Reply::new(caller, text)]
}

fn connect(
    clients: &Clients,
    chats: &mut Chats,
    caller: ClientId,
    target_name: &str,
    log: &logging::Logger,
) -> Vec<Reply> {
    let caller_name = display_name(clients, caller);

    if caller_name == target_name {
        return vec![Reply::new(caller, "Client is trying to connect to itself.")];
    }

    if let Some(chat) = chats.active_of(caller) {
        let peer = display_name(clients, chat.second_member(caller));
        return vec![Reply::new(
            caller,
            format!("You already in chat with {}.", peer),
        )];
    }

    let target = match clients.by_name(target_name) {
        Some(id) => id,
        None => return vec![Reply::new(caller, "Client may be disconnected.")],
    };

    // A repeated /connect re-notifies the target instead of piling up
    // duplicate requests for the same ordered pair.
    if chats.pending_from(caller, target).is_none() {
        chats.open(caller, target);
    } else {
        logging::debug!(log, "pending chat already exists";
                        "initiator" => caller,
                        "target" => target);
    }

    vec![Reply::new(
        target,
        format!("{} wants to start a chat with you.", caller_name),
    )]
}

fn leave_chat(clients: &Clients, chats: &mut Chats, caller: ClientId) -> Vec<Reply> {
    let chat_id = match chats.active_of(caller) {
        Some(chat) => chat.id,
        None => return vec![Reply::new(caller, "You have no active chat now.")],
    };

    match chats.remove(chat_id) {
        Some(chat) => chat
            .members()
            .iter()
            .map(|&member| {
                let other = display_name(clients, chat.second_member(member));
                Reply::new(member, format!("Chat with {} ended.", other))
            })
            .collect(),
        None => vec![],
    }
}

fn dialog(clients: &Clients, chats: &Chats, caller: ClientId) -> Vec<Reply> {
    match chats.active_of(caller) {
        Some(chat) => {
            let peer = display_name(clients, chat.second_member(caller));
            vec![Reply::new(
                caller,
                format!("You have active chat with {}.", peer),
            )]
        }
        None => vec![Reply::new(caller, "You do not have active chats.")],
    }
}

fn approve(
    clients: &Clients,
    chats: &mut Chats,
    caller: ClientId,
    initiator_name: &str,
    log: &logging::Logger,
) -> Vec<Reply> {
    let caller_name = display_name(clients, caller);

    if caller_name == initiator_name {
        return vec![Reply::new(
            caller,
            "You are trying to approve a chat with yourself.",
        )];
    }

    if let Some(chat) = chats.active_of(caller) {
        let peer = display_name(clients, chat.second_member(caller));
        return vec![Reply::new(
            caller,
            format!("You already has an active chat with {}.", peer),
        )];
    }

    let initiator = match clients.by_name(initiator_name) {
        Some(id) => id,
        None => return vec![Reply::new(caller, "Chat initiator may be disconnected.")],
    };

    if chats.active_of(initiator).is_some() {
        // The pending request is kept so the approval can be retried once
        // the initiator's current chat ends.
        return vec![Reply::new(
            caller,
            format!("{} already has an active chat.", initiator_name),
        )];
    }

    match chats.pending_from(initiator, caller) {
        Some(chat_id) => {
            chats.approve(chat_id);
            logging::info!(log, "chat approved";
                           "chat_id" => chat_id,
                           "initiator" => initiator,
                           "target" => caller);
            vec![
                Reply::new(
                    initiator,
                    format!("You started a chat with {}.", caller_name),
                ),
                Reply::new(
                    caller,
                    format!("You started a chat with {}.", initiator_name),
                ),
            ]
        }
        None => vec![Reply::new(
            caller,
            format!("You have no chat request from {}.", initiator_name),
        )],
    }
}

fn decline(
    clients: &Clients,
    chats: &mut Chats,
    caller: ClientId,
    initiator_name: &str,
    log: &logging::Logger,
) -> Vec<Reply> {
    let caller_name = display_name(clients, caller);

    if caller_name == initiator_name {
        return vec![Reply::new(
            caller,
            "You are trying to decline a chat with yourself.",
        )];
    }

    let initiator = match clients.by_name(initiator_name) {
        Some(id) => id,
        None => return vec![Reply::new(caller, "Chat initiator may be disconnected.")],
    };

    match chats.pending_from(initiator, caller) {
        Some(chat_id) => {
            chats.remove(chat_id);
            logging::info!(log, "chat declined";
                           "chat_id" => chat_id,
                           "initiator" => initiator,
                           "target" => caller);
            vec![
                Reply::new(
                    caller,
                    format!("You declined a chat request from {}.", initiator_name),
                ),
                Reply::new(
                    initiator,
                    format!("{} declined your chat request.", caller_name),
                ),
            ]
        }
        None => vec![Reply::new(
            caller,
            format!("You have no chat request from {}.", initiator_name),
        )],
    }
}

fn requests(clients: &Clients, chats: &Chats, caller: ClientId) -> Vec<Reply> {
    let pending = chats.pending_for(caller);

    if pending.is_empty() {
        return vec![Reply::new(caller, "You not have chat requests")];
    }

    let mut text = String::from("Chat requests from:");
    for (position, chat) in pending.iter().enumerate() {
        text.push('\n');
        text.push_str(&format!(
            "{}. {}",
            position + 1,
            display_name(clients, chat.initiator)
        ));
    }

    vec![Reply::new(caller, text)]
}
