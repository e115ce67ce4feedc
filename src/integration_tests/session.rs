use super::*;
use crate::transport::reply_code::{NOT_FOUND, PRECONDITION_FAILED};
use crate::{ErrorKind, ExchangeType, QueueDeclareOptions};

fn exclusive() -> QueueDeclareOptions {
    QueueDeclareOptions {
        exclusive: true,
        ..QueueDeclareOptions::default()
    }
}

#[test]
fn channels_are_numbered_from_one() {
    on_each_broker(|session| {
        let channels: Vec<_> = (0..4).map(|_| session.open_channel().unwrap()).collect();
        let numbers: Vec<_> = channels.iter().map(|c| c.number()).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
        assert!(channels.iter().all(|c| c.is_open()));
    })
}

#[test]
fn closed_channel_numbers_are_not_reused_early() {
    init_logging();
    let broker = MemoryBroker::new();
    let session = memory_session(&broker);
    let first = session.open_channel().unwrap();
    let second = session.open_channel().unwrap();
    first.close().unwrap();
    assert_eq!(session.open_channel().unwrap().number(), 3);
    assert!(second.is_open());
}

#[test]
fn declaring_twice_with_same_flags_succeeds() {
    on_each_broker(|session| {
        let channel = session.open_channel().unwrap();
        let name = unique("idempotent");
        let first = channel.declare_queue(name.as_str(), exclusive()).unwrap();
        let second = channel.declare_queue(name.as_str(), exclusive()).unwrap();
        assert_eq!(first.name(), second.name());
        assert!(session.last_operation_succeeded());
        assert_eq!(session.last_error(), None);
    })
}

#[test]
fn conflicting_declare_closes_channel() {
    on_each_broker(|session| {
        let channel = session.open_channel().unwrap();
        let name = unique("conflict");
        channel.declare_queue(name.as_str(), exclusive()).unwrap();

        let durable = QueueDeclareOptions {
            durable: true,
            ..exclusive()
        };
        let err = channel.declare_queue(name.as_str(), durable).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::DeclareRejected);
        assert_eq!(err.reply_code(), Some(PRECONDITION_FAILED));
        assert!(!session.last_operation_succeeded());
        assert!(session.last_error().is_some());

        assert!(!channel.is_open());
        let err = channel.declare_queue(name.as_str(), exclusive()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ChannelClosed);

        // The session itself is unaffected.
        let fresh = session.open_channel().unwrap();
        assert_eq!(fresh.number(), 2);
        fresh.declare_queue(name.as_str(), exclusive()).unwrap();
        assert!(session.last_operation_succeeded());
    })
}

#[test]
fn exchange_type_conflict_is_rejected() {
    on_each_broker(|session| {
        let channel = session.open_channel().unwrap();
        let name = unique("typed");
        let options = crate::ExchangeDeclareOptions {
            auto_delete: true,
            ..Default::default()
        };
        let exchange = channel
            .declare_exchange(name.as_str(), ExchangeType::Fanout, options.clone())
            .unwrap();
        assert_eq!(exchange.exchange_type(), ExchangeType::Fanout);

        let err = channel
            .declare_exchange(name.as_str(), ExchangeType::Direct, options)
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::DeclareRejected);
        assert_eq!(err.reply_code(), Some(PRECONDITION_FAILED));
    })
}

#[test]
fn bind_and_consume_need_existing_entities() {
    on_each_broker(|session| {
        let channel = session.open_channel().unwrap();
        let queue = channel.declare_queue("", exclusive()).unwrap();
        let err = queue
            .bind_to_exchange(unique("missing-exchange"), "key")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BindRejected);
        assert_eq!(err.reply_code(), Some(NOT_FOUND));

        let channel = session.open_channel().unwrap();
        let err = channel.consumer(unique("missing-queue")).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ConsumeRejected);
        assert_eq!(err.reply_code(), Some(NOT_FOUND));
    })
}

#[test]
fn publish_to_missing_exchange_is_rejected() {
    init_logging();
    let broker = MemoryBroker::new();
    let session = memory_session(&broker);
    let channel = session.open_channel().unwrap();
    let err = channel.publish("lost", "no-such-exchange", "key").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PublishRejected);
    assert_eq!(err.reply_code(), Some(NOT_FOUND));
    assert!(!channel.is_open());
}

#[test]
fn server_named_queue_and_counts() {
    init_logging();
    let broker = MemoryBroker::new();
    let session = memory_session(&broker);
    let channel = session.open_channel().unwrap();

    let queue = channel.declare_queue("", QueueDeclareOptions::default()).unwrap();
    assert!(queue.name().starts_with("amq.gen-"));
    channel.publish("one", "", queue.name()).unwrap();
    channel.publish("two", "", queue.name()).unwrap();

    let passive = QueueDeclareOptions {
        passive: true,
        ..QueueDeclareOptions::default()
    };
    let again = channel.declare_queue(queue.name(), passive).unwrap();
    assert_eq!((again.message_count(), again.consumer_count()), (2, 0));
    assert_eq!(broker.queue_len(queue.name()), Some(2));
}

#[test]
fn login_failures() {
    init_logging();
    let broker = MemoryBroker::new();
    let session = Session::with_transport(broker.connect());

    assert_eq!(
        session.open_channel().err().unwrap().kind(),
        ErrorKind::AuthFailure
    );
    assert_eq!(
        session.login("guest", "wrong").unwrap_err().kind(),
        ErrorKind::AuthFailure
    );
    assert!(!session.is_authenticated());
    assert!(!session.last_operation_succeeded());

    session.login("guest", "guest").unwrap();
    assert!(session.is_authenticated());
    assert!(session.last_operation_succeeded());
    match session.login("guest", "guest").unwrap_err() {
        crate::Error::AlreadyAuthenticated => (),
        err => panic!("unexpected error {}", err),
    }
}

#[test]
fn connect_failures_are_explicit() {
    init_logging();
    // Nothing listens on port 1 of the loopback interface.
    let err = Session::open("127.0.0.1", 1).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::ConnectFailure);

    let err = Session::open_url("amqps://localhost").err().unwrap();
    assert_eq!(err.kind(), ErrorKind::ConnectFailure);
}

#[test]
fn channel_outliving_session_reports_closed_connection() {
    init_logging();
    let broker = MemoryBroker::new();
    let session = memory_session(&broker);
    let channel = session.open_channel().unwrap();
    drop(session);

    assert!(!channel.is_open());
    let err = channel.declare_queue("late", exclusive()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::ConnectionClosed);
}

#[test]
fn closing_session_releases_exclusive_queues() {
    init_logging();
    let broker = MemoryBroker::new();
    let session = memory_session(&broker);
    let channel = session.open_channel().unwrap();
    channel.declare_queue("private", exclusive()).unwrap();
    channel
        .declare_queue("shared", QueueDeclareOptions::default())
        .unwrap();
    assert_eq!(broker.queue_names(), vec!["private", "shared"]);

    session.close().unwrap();
    assert_eq!(broker.queue_names(), vec!["shared"]);
    assert_eq!(
        channel.declare_queue("again", exclusive()).err().unwrap().kind(),
        ErrorKind::ConnectionClosed
    );
}

#[test]
fn exclusive_queue_is_locked_to_its_session() {
    init_logging();
    let broker = MemoryBroker::new();
    let owner = memory_session(&broker);
    let other = memory_session(&broker);
    let owner_channel = owner.open_channel().unwrap();
    owner_channel.declare_queue("mine", exclusive()).unwrap();

    let channel = other.open_channel().unwrap();
    let err = channel.consumer("mine").err().unwrap();
    assert_eq!(err.kind(), ErrorKind::ConsumeRejected);
    assert_eq!(err.reply_code(), Some(crate::transport::reply_code::RESOURCE_LOCKED));
}
