/// Built-in SASL authentication mechanisms.
///
/// The [`default`](#impl-Default) implementation creates an [`Auth::Plain`](#variant.Plain)
/// variant with the username and password both set to `guest`.
///
/// # Warning
///
/// SASL mechanisms that require AMQP secure / secure-ok exchanges are not supported.
#[derive(Clone, PartialEq)]
pub enum Auth {
    /// PLAIN authentication via a username and password.
    Plain { username: String, password: String },

    /// EXTERNAL authentication, where the broker identifies the client by other means.
    External,
}

impl Auth {
    pub fn plain<U: Into<String>, P: Into<String>>(username: U, password: P) -> Auth {
        Auth::Plain {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The SASL mechanism to report. The server must support this mechanism for
    /// authentication to succeed.
    pub fn mechanism(&self) -> &'static str {
        match self {
            Auth::Plain { .. } => "PLAIN",
            Auth::External => "EXTERNAL",
        }
    }

    /// The response body to send along with the mechanism.
    pub fn response(&self) -> String {
        match self {
            Auth::Plain { username, password } => format!("\x00{}\x00{}", username, password),
            Auth::External => String::new(),
        }
    }

    pub(crate) fn username(&self) -> &str {
        match self {
            Auth::Plain { username, .. } => username,
            Auth::External => "",
        }
    }
}

impl Default for Auth {
    fn default() -> Auth {
        Auth::plain("guest", "guest")
    }
}

// Keep passwords out of logs.
impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Auth::Plain { username, .. } => f
                .debug_struct("Plain")
                .field("username", username)
                .field("password", &"********")
                .finish(),
            Auth::External => f.write_str("External"),
        }
    }
}
