//! Event schemas and log decoding.
//!
//! Decoding works on ABIs loaded at runtime, so schemas are built from
//! `alloy::json_abi::Event` descriptors instead of `sol!` types. Compile-time
//! event types are still supported through [`SolEventDecoder`].

use std::marker::PhantomData;

use alloy::{
    dyn_abi::{DynSolType, DynSolValue},
    json_abi::Event,
    primitives::{keccak256, B256},
    rpc::types::Log,
    sol_types::SolEvent,
};
use serde_json::Value;

use super::{codec, BindingError};

/// Decodes raw logs of one event into some output type.
pub trait LogDecoder: Send {
    type Output;

    /// Name of the event, for diagnostics.
    fn event_name(&self) -> &str;

    fn decode(&self, log: &Log) -> Result<Self::Output, BindingError>;
}

/// One field of an event as declared in the ABI.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    pub name: String,
    pub ty: DynSolType,
    pub indexed: bool,
}

/// Event description derived from the ABI at binding time.
#[derive(Debug, Clone)]
pub struct EventSchema {
    name: String,
    selector: B256,
    anonymous: bool,
    fields: Vec<FieldSchema>,
}

impl EventSchema {
    pub fn from_event(event: &Event) -> Result<Self, BindingError> {
        let fields = event
            .inputs
            .iter()
            .enumerate()
            .map(|(i, param)| {
                let ty_str = param.selector_type();
                let ty = DynSolType::parse(&ty_str).map_err(|e| BindingError::InvalidType {
                    ty: ty_str.to_string(),
                    reason: e.to_string(),
                })?;
                let name = if param.name.is_empty() {
                    format!("arg{}", i)
                } else {
                    param.name.clone()
                };
                Ok(FieldSchema {
                    name,
                    ty,
                    indexed: param.indexed,
                })
            })
            .collect::<Result<Vec<_>, BindingError>>()?;

        Ok(Self {
            name: event.name.clone(),
            selector: event.selector(),
            anonymous: event.anonymous,
            fields,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Topic 0 of non-anonymous logs.
    pub fn selector(&self) -> B256 {
        self.selector
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    pub fn indexed_fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields.iter().filter(|f| f.indexed)
    }

    pub fn indexed_count(&self) -> usize {
        self.indexed_fields().count()
    }

    /// Converts per-field filter values into topic lists, one list per
    /// indexed field in declaration order. An empty list matches anything.
    pub fn topic_filter(&self, rules: &[Vec<DynSolValue>]) -> Result<Vec<Vec<B256>>, BindingError> {
        let indexed: Vec<&FieldSchema> = self.indexed_fields().collect();
        if rules.len() > indexed.len() {
            return Err(BindingError::TooManyTopicRules {
                event: self.name.clone(),
                indexed: indexed.len(),
                rules: rules.len(),
            });
        }

        rules
            .iter()
            .zip(indexed)
            .map(|(values, field)| {
                values
                    .iter()
                    .map(|value| topic_for(field, value))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect()
    }

    /// Unpacks a log into a [`DecodedEvent`]. Any mismatch between the log
    /// and this schema is an error; partial results are never returned.
    pub fn decode_log(&self, log: &Log) -> Result<DecodedEvent, BindingError> {
        let mut topics = log.topics();

        if !self.anonymous {
            match topics.first() {
                Some(topic) if *topic == self.selector => topics = &topics[1..],
                Some(topic) => {
                    return Err(BindingError::decode_log(
                        &self.name,
                        format!("topic0 {} does not match selector {}", topic, self.selector),
                    ))
                }
                None => return Err(BindingError::decode_log(&self.name, "log has no topics")),
            }
        }

        let indexed = self.indexed_count();
        if topics.len() != indexed {
            return Err(BindingError::decode_log(
                &self.name,
                format!("expected {} indexed topics, got {}", indexed, topics.len()),
            ));
        }

        let data = log.data().data.as_ref();
        let mut body = self.decode_body(data)?.into_iter();
        let mut topics = topics.iter();

        let mut fields = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let value = if field.indexed {
                // Counts were checked above.
                let topic = topics.next().ok_or_else(|| {
                    BindingError::decode_log(&self.name, "ran out of topics")
                })?;
                self.decode_topic(field, topic)?
            } else {
                body.next().ok_or_else(|| {
                    BindingError::decode_log(&self.name, "ran out of data fields")
                })?
            };
            fields.push(EventField {
                name: field.name.clone(),
                value,
                indexed: field.indexed,
            });
        }

        Ok(DecodedEvent {
            name: self.name.clone(),
            fields,
            raw: log.clone(),
        })
    }

    fn decode_body(&self, data: &[u8]) -> Result<Vec<DynSolValue>, BindingError> {
        let types: Vec<DynSolType> = self
            .fields
            .iter()
            .filter(|f| !f.indexed)
            .map(|f| f.ty.clone())
            .collect();

        if types.is_empty() {
            if !data.is_empty() {
                return Err(BindingError::decode_log(
                    &self.name,
                    format!("expected empty data, got {} bytes", data.len()),
                ));
            }
            return Ok(Vec::new());
        }

        let decoded = DynSolType::Tuple(types)
            .abi_decode_sequence(data)
            .map_err(|e| BindingError::decode_log(&self.name, e))?;

        // Only the canonical encoding is accepted: no short reads hidden by
        // the decoder and no trailing bytes.
        if decoded.abi_encode_sequence().as_deref() != Some(data) {
            return Err(BindingError::decode_log(
                &self.name,
                format!("data of {} bytes is not a valid encoding of the event body", data.len()),
            ));
        }

        match decoded {
            DynSolValue::Tuple(values) => Ok(values),
            other => Ok(vec![other]),
        }
    }

    fn decode_topic(&self, field: &FieldSchema, topic: &B256) -> Result<DynSolValue, BindingError> {
        if !is_word_type(&field.ty) {
            // Dynamic values are stored as their keccak256 hash.
            return Ok(DynSolValue::FixedBytes(*topic, 32));
        }

        let value = field
            .ty
            .abi_decode(topic.as_slice())
            .map_err(|e| BindingError::decode_log(&self.name, format!("field '{}': {}", field.name, e)))?;

        if value.as_word() != Some(*topic) {
            return Err(BindingError::decode_log(
                &self.name,
                format!("topic {} is not a valid '{}' value for field '{}'", topic, field.ty, field.name),
            ));
        }
        Ok(value)
    }
}

impl LogDecoder for EventSchema {
    type Output = DecodedEvent;

    fn event_name(&self) -> &str {
        &self.name
    }

    fn decode(&self, log: &Log) -> Result<DecodedEvent, BindingError> {
        self.decode_log(log)
    }
}

fn is_word_type(ty: &DynSolType) -> bool {
    matches!(
        ty,
        DynSolType::Address
            | DynSolType::Bool
            | DynSolType::Int(_)
            | DynSolType::Uint(_)
            | DynSolType::FixedBytes(_)
    )
}

fn topic_for(field: &FieldSchema, value: &DynSolValue) -> Result<B256, BindingError> {
    let unsupported = || BindingError::UnsupportedTopic {
        field: field.name.clone(),
        ty: field.ty.to_string(),
    };

    match (&field.ty, value) {
        (DynSolType::String, DynSolValue::String(s)) => Ok(keccak256(s.as_bytes())),
        (DynSolType::Bytes, DynSolValue::Bytes(b)) => Ok(keccak256(b)),
        (ty, value) if is_word_type(ty) => {
            if !ty.matches(value) {
                return Err(BindingError::Encode {
                    name: field.name.clone(),
                    reason: format!("expected a '{}' topic value, got {:?}", ty, value),
                });
            }
            value.as_word().ok_or_else(unsupported)
        }
        _ => Err(unsupported()),
    }
}

/// A field of a decoded event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventField {
    pub name: String,
    pub value: DynSolValue,
    /// Whether the value came from a topic rather than the data blob.
    pub indexed: bool,
}

/// A log unpacked against an [`EventSchema`], with the raw log attached.
#[derive(Debug, Clone)]
pub struct DecodedEvent {
    pub name: String,
    pub fields: Vec<EventField>,
    pub raw: Log,
}

impl DecodedEvent {
    pub fn get(&self, name: &str) -> Option<&DynSolValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    pub fn indexed(&self) -> impl Iterator<Item = &EventField> {
        self.fields.iter().filter(|f| f.indexed)
    }

    pub fn body(&self) -> impl Iterator<Item = &EventField> {
        self.fields.iter().filter(|f| !f.indexed)
    }

    pub fn to_json(&self) -> Value {
        let fields: serde_json::Map<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.name.clone(), codec::dyn_sol_value_to_json(&f.value)))
            .collect();

        serde_json::json!({
            "event": self.name,
            "address": format!("{:?}", self.raw.address()),
            "block_number": self.raw.block_number,
            "transaction_hash": self.raw.transaction_hash.map(|h| format!("{:?}", h)),
            "log_index": self.raw.log_index,
            "fields": fields,
        })
    }
}

/// An event decoded into a `sol!`-generated type.
#[derive(Debug, Clone)]
pub struct TypedEvent<E> {
    pub event: E,
    pub raw: Log,
}

/// Decoder for events known at compile time.
pub struct SolEventDecoder<E>(PhantomData<fn() -> E>);

impl<E> SolEventDecoder<E> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<E> Default for SolEventDecoder<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: SolEvent> LogDecoder for SolEventDecoder<E> {
    type Output = TypedEvent<E>;

    fn event_name(&self) -> &str {
        E::SIGNATURE
    }

    fn decode(&self, log: &Log) -> Result<TypedEvent<E>, BindingError> {
        let event = E::decode_log_data(log.data(), true)
            .map_err(|e| BindingError::decode_log(E::SIGNATURE, e))?;
        Ok(TypedEvent {
            event,
            raw: log.clone(),
        })
    }
}
