use std::fmt;

/// Topic the server reads from and the client publishes to.
pub const SERVER_TOPIC: &str = "mcp-server";
/// Topic the client reads from and the server publishes to.
pub const CLIENT_TOPIC: &str = "mcp-client";

/// Which side of the RPC conversation a transport speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl Role {
    /// Topic this role publishes on.
    pub fn send_topic(self) -> &'static str {
        match self {
            Role::Server => CLIENT_TOPIC,
            Role::Client => SERVER_TOPIC,
        }
    }

    /// Topic this role subscribes to.
    pub fn read_topic(self) -> &'static str {
        match self {
            Role::Server => SERVER_TOPIC,
            Role::Client => CLIENT_TOPIC,
        }
    }

    /// `(send, read)` pair.
    pub fn topics(self) -> (&'static str, &'static str) {
        (self.send_topic(), self.read_topic())
    }

    pub fn peer(self) -> Role {
        match self {
            Role::Server => Role::Client,
            Role::Client => Role::Server,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => f.write_str("server"),
            Role::Client => f.write_str("client"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_topics() {
        assert_eq!(Role::Server.topics(), ("mcp-client", "mcp-server"));
    }

    #[test]
    fn client_topics() {
        assert_eq!(Role::Client.topics(), ("mcp-server", "mcp-client"));
    }

    #[test]
    fn roles_are_mirrors() {
        for role in [Role::Server, Role::Client] {
            assert_eq!(role.send_topic(), role.peer().read_topic());
            assert_eq!(role.read_topic(), role.peer().send_topic());
            assert_ne!(role.send_topic(), role.read_topic());
        }
    }
}
