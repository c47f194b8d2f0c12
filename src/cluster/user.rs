/// An authenticated client account. Connections of the client role hold a
/// counted reference to the user they authenticated as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub access_level: u8,
}

impl User {
    pub fn new(username: impl Into<String>, access_level: u8) -> User {
        User {
            username: username.into(),
            access_level,
        }
    }
}
