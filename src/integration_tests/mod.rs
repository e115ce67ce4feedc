use crate::transport::memory::MemoryBroker;
use crate::{Consumer, Delivery, Session};
use std::env;
use std::sync::Once;
use std::time::Duration;
use uuid::Uuid;

mod consumer;
mod routing;
mod session;

// Long enough for a live broker to route a message.
const WAIT: Duration = Duration::from_secs(5);

// How long to watch for a message that must not arrive.
const QUIET: Duration = Duration::from_millis(300);

static PRINT_WARNING: Once = Once::new();

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn with_test_url<F: FnOnce(&str)>(f: F) {
    match env::var("WARREN_TEST_URL") {
        Ok(url) => f(&url),
        Err(env::VarError::NotPresent) => PRINT_WARNING.call_once(|| {
            println!("WARREN_TEST_URL not defined - skipping live broker tests");
        }),
        Err(env::VarError::NotUnicode(_)) => {
            panic!("WARREN_TEST_URL exists but is not valid unicode")
        }
    }
}

fn memory_session(broker: &MemoryBroker) -> Session {
    let session = Session::with_transport(broker.connect());
    session.login("guest", "guest").unwrap();
    session
}

// Run a scenario against an in-process broker, and against a live one if configured.
fn on_each_broker<F: Fn(&Session)>(f: F) {
    init_logging();
    let broker = MemoryBroker::new();
    f(&memory_session(&broker));

    with_test_url(|url| {
        let session = Session::open_url(url).unwrap();
        f(&session);
        session.close().unwrap();
    })
}

fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

fn expect_message(consumer: &Consumer) -> Delivery {
    match consumer.pop_timeout(WAIT).unwrap() {
        Some(delivery) => delivery,
        None => panic!("no message for consumer {} within {:?}", consumer.tag(), WAIT),
    }
}

fn expect_nothing(consumer: &Consumer) {
    if let Some(delivery) = consumer.pop_timeout(QUIET).unwrap() {
        panic!(
            "consumer {} unexpectedly received {:?}",
            consumer.tag(),
            String::from_utf8_lossy(delivery.content())
        );
    }
}
