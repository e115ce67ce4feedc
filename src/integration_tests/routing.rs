use super::*;
use crate::{Arguments, Channel, ExchangeDeclareOptions, ExchangeType, Queue, QueueDeclareOptions};

fn temp_queue(channel: &Channel) -> Queue {
    let options = QueueDeclareOptions {
        exclusive: true,
        ..QueueDeclareOptions::default()
    };
    channel.declare_queue("", options).unwrap()
}

fn temp_exchange() -> ExchangeDeclareOptions {
    ExchangeDeclareOptions {
        auto_delete: true,
        ..ExchangeDeclareOptions::default()
    }
}

#[test]
fn direct_exchange_routes_by_key() {
    on_each_broker(|session| {
        let channel = session.open_channel().unwrap();
        let exchange = channel
            .declare_exchange(unique("direct"), ExchangeType::Direct, temp_exchange())
            .unwrap();
        let queue = temp_queue(&channel);
        queue.bind_to_exchange(&exchange, "k1").unwrap();
        let consumer = queue.consume().unwrap();

        exchange.publish("m", "k2").unwrap();
        exchange.publish("m", "k1").unwrap();

        let delivery = expect_message(&consumer);
        assert_eq!(delivery.content(), b"m");
        assert_eq!(delivery.routing_key(), "k1");
        assert_eq!(delivery.exchange(), exchange.name());
        expect_nothing(&consumer);
    })
}

#[test]
fn exchange_type_defaults_to_direct() {
    on_each_broker(|session| {
        let channel = session.open_channel().unwrap();
        let name = unique("default-type");
        let exchange = channel
            .declare_direct_exchange(name.as_str(), temp_exchange())
            .unwrap();
        assert_eq!(exchange.exchange_type(), ExchangeType::Direct);
        channel
            .declare_exchange(name.as_str(), ExchangeType::Direct, temp_exchange())
            .unwrap();

        let queue = temp_queue(&channel);
        queue.bind_to_exchange(&exchange, "k1").unwrap();
        let consumer = queue.consume().unwrap();
        exchange.publish("m", "k2").unwrap();
        exchange.publish("m", "k1").unwrap();
        assert_eq!(expect_message(&consumer).routing_key(), "k1");
        expect_nothing(&consumer);
    })
}

#[test]
fn fanout_exchange_reaches_every_queue() {
    on_each_broker(|session| {
        let channel = session.open_channel().unwrap();
        let exchange = channel
            .declare_exchange(unique("fanout"), ExchangeType::Fanout, temp_exchange())
            .unwrap();
        let q1 = temp_queue(&channel);
        let q2 = temp_queue(&channel);
        q1.bind_to_exchange(&exchange, "").unwrap();
        q2.bind_to_exchange(&exchange, "ignored").unwrap();
        let c1 = q1.consume().unwrap();
        let c2 = q2.consume().unwrap();

        exchange.publish("broadcast", "whatever").unwrap();

        let delivered = vec![expect_message(&c1), expect_message(&c2)];
        assert_eq!(delivered.len(), 2);
        assert!(delivered.iter().all(|d| d.content() == b"broadcast"));
        expect_nothing(&c1);
        expect_nothing(&c2);
    })
}

#[test]
fn topic_exchange_wildcards() {
    on_each_broker(|session| {
        let channel = session.open_channel().unwrap();
        let exchange = channel
            .declare_exchange(unique("topic"), ExchangeType::Topic, temp_exchange())
            .unwrap();
        let matching = temp_queue(&channel);
        let other = temp_queue(&channel);
        matching.bind_to_exchange(&exchange, "doc1.1.#").unwrap();
        other.bind_to_exchange(&exchange, "doc1.2.#").unwrap();
        let matching = matching.consume().unwrap();
        let other = other.consume().unwrap();

        exchange.publish("chapter", "doc1.1").unwrap();

        assert_eq!(expect_message(&matching).content(), b"chapter");
        expect_nothing(&other);
    })
}

#[test]
fn headers_exchange_match_all_by_default() {
    on_each_broker(|session| {
        let channel = session.open_channel().unwrap();
        let exchange = channel
            .declare_exchange(unique("headers"), ExchangeType::Headers, temp_exchange())
            .unwrap();
        let wants_1 = temp_queue(&channel);
        let wants_2 = temp_queue(&channel);
        wants_1
            .bind_with_arguments(&exchange, &Arguments::new().with("a", "1"))
            .unwrap();
        wants_2
            .bind_with_arguments(&exchange, &Arguments::new().with("a", "2"))
            .unwrap();
        let wants_1 = wants_1.consume().unwrap();
        let wants_2 = wants_2.consume().unwrap();

        exchange
            .publish_with_headers("payload", &Arguments::new().with("a", "1"))
            .unwrap();

        let delivery = expect_message(&wants_1);
        assert_eq!(delivery.content(), b"payload");
        assert_eq!(delivery.headers().and_then(|h| h.get("a")), Some("1"));
        expect_nothing(&wants_2);
    })
}

#[test]
fn headers_exchange_match_any() {
    on_each_broker(|session| {
        let channel = session.open_channel().unwrap();
        let exchange = channel
            .declare_exchange(unique("headers"), ExchangeType::Headers, temp_exchange())
            .unwrap();
        let any = temp_queue(&channel);
        let all = temp_queue(&channel);
        let binding = Arguments::new().with("format", "pdf").with("type", "report");
        any.bind_with_arguments(&exchange, &binding.clone().match_any())
            .unwrap();
        all.bind_with_arguments(&exchange, &binding.match_all())
            .unwrap();
        let any = any.consume().unwrap();
        let all = all.consume().unwrap();

        let headers = Arguments::new().with("format", "pdf").with("type", "log");
        exchange.publish_with_headers("partial", &headers).unwrap();

        assert_eq!(expect_message(&any).content(), b"partial");
        expect_nothing(&all);
    })
}

#[test]
fn default_exchange_routes_to_named_queue() {
    on_each_broker(|session| {
        let channel = session.open_channel().unwrap();
        let queue = temp_queue(&channel);
        let consumer = channel.consumer(&queue).unwrap();

        channel.publish(&b"\x00raw\xffbytes"[..], "", queue.name()).unwrap();

        let delivery = expect_message(&consumer);
        assert_eq!(delivery.content(), b"\x00raw\xffbytes");
        assert_eq!(delivery.exchange(), "");
        assert_eq!(delivery.routing_key(), queue.name());
    })
}
