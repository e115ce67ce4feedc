use crate::Arguments;

/// A message delivered to a [`Consumer`](struct.Consumer.html).
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    consumer_tag: String,
    delivery_tag: u64,
    redelivered: bool,
    exchange: String,
    routing_key: String,
    content: Vec<u8>,
    headers: Option<Arguments>,
}

impl Delivery {
    pub(crate) fn new(
        consumer_tag: String,
        delivery_tag: u64,
        redelivered: bool,
        exchange: String,
        routing_key: String,
        content: Vec<u8>,
        headers: Option<Arguments>,
    ) -> Delivery {
        Delivery {
            consumer_tag,
            delivery_tag,
            redelivered,
            exchange,
            routing_key,
            content,
            headers,
        }
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// String headers the message was published with, if any.
    pub fn headers(&self) -> Option<&Arguments> {
        self.headers.as_ref()
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn into_content(self) -> Vec<u8> {
        self.content
    }
}
