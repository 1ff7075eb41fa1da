#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// Only clients originate pings; servers answer them.
    pub(crate) fn originates_pings(self) -> bool { matches!(self, Role::Client) }

    pub(crate) fn label(self) -> &'static str {
        match self {
            Role::Client => "CLI",
            Role::Server => "SRV",
        }
    }
}
