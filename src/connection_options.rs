use crate::errors::*;
use crate::Auth;
use amq_protocol::protocol::connection::{Open, Start, StartOk, Tune, TuneOk};
use amq_protocol::protocol::constants::FRAME_MIN_SIZE;
use amq_protocol::types::{AMQPValue, FieldTable};
use std::time::Duration;

/// Options that control the overall AMQP connection.
///
/// `ConnectionOptions` uses the builder pattern. The default settings are equivalent to
///
/// ```rust
/// use warren::{Auth, ConnectionOptions};
///
/// # fn default_connection_options() -> ConnectionOptions {
/// ConnectionOptions::default()
///     .auth(Auth::default())
///     .virtual_host("/")
///     .locale("en_US")
///     .channel_max(0)
///     .frame_max(0)
///     .heartbeat(60)
///     .connection_timeout(None)
///     .information(None)
/// # }
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionOptions {
    pub(crate) auth: Auth,
    pub(crate) virtual_host: String,
    pub(crate) locale: String,
    pub(crate) channel_max: u16,
    pub(crate) frame_max: u32,
    pub(crate) heartbeat: u16,
    pub(crate) connection_timeout: Option<Duration>,
    information: Option<String>,
}

impl Default for ConnectionOptions {
    // NOTE: If we change this, make sure to change the doc comment above.
    fn default() -> Self {
        ConnectionOptions {
            auth: Auth::default(),
            virtual_host: "/".to_string(),
            locale: "en_US".to_string(),
            channel_max: 0,
            frame_max: 0,
            heartbeat: 60,
            connection_timeout: None,
            information: None,
        }
    }
}

impl ConnectionOptions {
    /// Sets the credentials used by [`Session::connect`](struct.Session.html#method.connect).
    /// [`Session::login`](struct.Session.html#method.login) supplies its own.
    pub fn auth(self, auth: Auth) -> Self {
        ConnectionOptions { auth, ..self }
    }

    /// Sets the AMQP virtual host.
    pub fn virtual_host<T: Into<String>>(self, virtual_host: T) -> Self {
        ConnectionOptions {
            virtual_host: virtual_host.into(),
            ..self
        }
    }

    /// Sets the locale. AMQP requires servers support `en_US`.
    pub fn locale<T: Into<String>>(self, locale: T) -> Self {
        ConnectionOptions {
            locale: locale.into(),
            ..self
        }
    }

    /// Sets the maximum number of channels that can be open at once on this connection. 0 lets
    /// the server choose; otherwise the lower of this and the server's value is used.
    pub fn channel_max(self, channel_max: u16) -> Self {
        ConnectionOptions {
            channel_max,
            ..self
        }
    }

    /// Sets the maximum frame size in bytes. 0 lets the server choose; otherwise the lower of
    /// this and the server's value is used. Messages larger than a frame are split across
    /// several body frames.
    ///
    /// AMQP specifies a minimum of 4096; anything lower fails when the connection is opened.
    pub fn frame_max(self, frame_max: u32) -> Self {
        ConnectionOptions { frame_max, ..self }
    }

    /// Sets the heartbeat interval in seconds. 0 disables heartbeats.
    pub fn heartbeat(self, heartbeat: u16) -> Self {
        ConnectionOptions { heartbeat, ..self }
    }

    /// Sets the timeout for the initial TCP connection. If None (the default), there is no
    /// timeout.
    pub fn connection_timeout(self, connection_timeout: Option<Duration>) -> Self {
        ConnectionOptions {
            connection_timeout,
            ..self
        }
    }

    /// Sets the "information" client property shown by broker management tools.
    pub fn information(self, information: Option<String>) -> Self {
        ConnectionOptions {
            information,
            ..self
        }
    }

    pub(crate) fn make_start_ok(&self, auth: &Auth, start: &Start) -> Result<StartOk> {
        // helper to search space-separated strings (mechanisms and locales)
        fn server_supports(server: &str, client: &str) -> bool {
            server.split(' ').any(|s| s == client)
        }

        let mechanism = auth.mechanism();
        if !server_supports(&start.mechanisms, mechanism) {
            return UnsupportedAuthMechanismSnafu {
                available: start.mechanisms.clone(),
                requested: mechanism,
            }
            .fail();
        }
        if !server_supports(&start.locales, &self.locale) {
            return UnsupportedLocaleSnafu {
                available: start.locales.clone(),
                requested: self.locale.clone(),
            }
            .fail();
        }

        let mut client_properties = FieldTable::new();
        let mut set_prop = |k: &str, v: String| {
            client_properties.insert(k.to_string(), AMQPValue::LongString(v));
        };
        set_prop("product", crate::built_info::PKG_NAME.to_string());
        set_prop("version", crate::built_info::PKG_VERSION.to_string());
        set_prop(
            "platform",
            format!(
                "{} / {}",
                crate::built_info::CFG_OS,
                crate::built_info::RUSTC_VERSION
            ),
        );
        if let Some(information) = &self.information {
            set_prop("information", information.to_string());
        }
        let mut capabilities = FieldTable::new();
        capabilities.insert(
            "consumer_cancel_notify".to_string(),
            AMQPValue::Boolean(true),
        );
        client_properties.insert(
            "capabilities".to_string(),
            AMQPValue::FieldTable(capabilities),
        );

        Ok(StartOk {
            client_properties,
            mechanism: mechanism.to_string(),
            response: auth.response(),
            locale: self.locale.clone(),
        })
    }

    pub(crate) fn make_tune_ok(&self, tune: &Tune) -> Result<TuneOk> {
        fn promote_0_u16(val: u16) -> u16 {
            if val == 0 {
                u16::max_value()
            } else {
                val
            }
        }
        fn promote_0_u32(val: u32) -> u32 {
            if val == 0 {
                u32::max_value()
            } else {
                val
            }
        }

        let channel_max = u16::min(
            promote_0_u16(tune.channel_max),
            promote_0_u16(self.channel_max),
        );
        let frame_max = u32::min(
            promote_0_u32(tune.frame_max),
            promote_0_u32(self.frame_max),
        );
        let heartbeat = u16::min(tune.heartbeat, self.heartbeat);

        if frame_max < u32::from(FRAME_MIN_SIZE) {
            return FrameMaxTooSmallSnafu {
                min: u32::from(FRAME_MIN_SIZE),
                requested: frame_max,
            }
            .fail();
        }

        Ok(TuneOk {
            channel_max,
            frame_max,
            heartbeat,
        })
    }

    pub(crate) fn make_open(&self) -> Open {
        Open {
            virtual_host: self.virtual_host.clone(),
            capabilities: String::new(), // reserved
            insist: false,               // reserved
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tune(channel_max: u16, frame_max: u32, heartbeat: u16) -> Tune {
        Tune {
            channel_max,
            frame_max,
            heartbeat,
        }
    }

    fn start(mechanisms: &str, locales: &str) -> Start {
        Start {
            version_major: 0,
            version_minor: 9,
            server_properties: FieldTable::new(),
            mechanisms: mechanisms.to_string(),
            locales: locales.to_string(),
        }
    }

    #[test]
    fn channel_max() {
        let cases = [(0, 0, 65535), (10, 0, 10), (0, 10, 10), (20, 10, 10), (10, 20, 10)];
        for &(client, server, expected) in &cases {
            let options = ConnectionOptions::default().channel_max(client);
            let tune_ok = options.make_tune_ok(&tune(server, 1 << 17, 60)).unwrap();
            assert_eq!(
                tune_ok.channel_max, expected,
                "client={} server={}",
                client, server
            );
        }
    }

    #[test]
    fn heartbeat_and_frame_max() {
        let options = ConnectionOptions::default().heartbeat(30).frame_max(0);
        let tune_ok = options.make_tune_ok(&tune(0, 1 << 17, 60)).unwrap();
        assert_eq!(tune_ok.heartbeat, 30);
        assert_eq!(tune_ok.frame_max, 1 << 17);

        let options = ConnectionOptions::default().heartbeat(0);
        let tune_ok = options.make_tune_ok(&tune(0, 0, 60)).unwrap();
        assert_eq!(tune_ok.heartbeat, 0);
        assert_eq!(tune_ok.frame_max, u32::max_value());
    }

    #[test]
    fn start_ok_carries_credentials_and_properties() {
        let options = ConnectionOptions::default().information(Some("worker 7".to_string()));
        let auth = Auth::plain("user", "pw");
        let start_ok = options
            .make_start_ok(&auth, &start("AMQPLAIN PLAIN", "en_US"))
            .unwrap();
        assert_eq!(start_ok.mechanism, "PLAIN");
        assert_eq!(start_ok.response, "\x00user\x00pw");
        assert_eq!(start_ok.locale, "en_US");
        let props = &start_ok.client_properties;
        match props.get("product") {
            Some(AMQPValue::LongString(product)) => assert_eq!(product, "warren"),
            other => panic!("unexpected product {:?}", other),
        }
        match props.get("information") {
            Some(AMQPValue::LongString(info)) => assert_eq!(info, "worker 7"),
            other => panic!("unexpected information {:?}", other),
        }
    }

    #[test]
    fn unsupported_auth_mechanism() {
        let options = ConnectionOptions::default();
        let start = start("NOTPLAIN SOMETHINGELSE", "en_US");
        let res = options.make_start_ok(&Auth::default(), &start);
        match res.unwrap_err() {
            Error::UnsupportedAuthMechanism { .. } => (),
            err => panic!("unexpected error {}", err),
        }
    }

    #[test]
    fn unsupported_locale() {
        let options = ConnectionOptions::default().locale("nonexistent");
        let start = start("PLAIN", "en_US es_ES");
        let res = options.make_start_ok(&Auth::default(), &start);
        match res.unwrap_err() {
            Error::UnsupportedLocale { .. } => (),
            err => panic!("unexpected error {}", err),
        }
    }

    #[test]
    fn frame_max_too_small() {
        let options = ConnectionOptions::default().frame_max(u32::from(FRAME_MIN_SIZE) - 1);
        let res = options.make_tune_ok(&tune(u16::max_value(), 1 << 17, 60));
        match res.unwrap_err() {
            Error::FrameMaxTooSmall { .. } => (),
            err => panic!("unexpected error {}", err),
        }
    }

    #[test]
    fn open_uses_virtual_host() {
        let options = ConnectionOptions::default().virtual_host("staging");
        assert_eq!(options.make_open().virtual_host, "staging");
    }
}
