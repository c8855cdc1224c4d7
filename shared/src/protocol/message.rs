use refsync_serde::{
    BitReader, BitWrite, Serde, SerdeErr, UnsignedInteger, UnsignedVariableInteger,
};

use crate::{
    reference::{Endpoint, ReferenceId},
    value::{PropertyKey, Value, ValueType},
};

type ActionTag = UnsignedInteger<3>;
type MessageTag = UnsignedInteger<3>;
type Count = UnsignedVariableInteger<7>;

/// One mutation, as sent between endpoints.
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateAction {
    SetValue(Value),
    SetProperty { key: PropertyKey, value: Value },
    DeleteProperty { key: PropertyKey },
    AddElements { values: Vec<Value> },
    RemoveElement { index: usize },
    Clear,
    Splice {
        start: usize,
        delete_count: usize,
        insert: Vec<Value>,
    },
}

impl UpdateAction {
    pub fn name(&self) -> &'static str {
        match self {
            UpdateAction::SetValue(_) => "set_value",
            UpdateAction::SetProperty { .. } => "set_property",
            UpdateAction::DeleteProperty { .. } => "delete_property",
            UpdateAction::AddElements { .. } => "add_element",
            UpdateAction::RemoveElement { .. } => "remove_element",
            UpdateAction::Clear => "clear",
            UpdateAction::Splice { .. } => "splice_range",
        }
    }

    pub fn contains_handle(&self) -> bool {
        match self {
            UpdateAction::SetValue(value) | UpdateAction::SetProperty { value, .. } => {
                value.contains_handle()
            }
            UpdateAction::AddElements { values } => values.iter().any(Value::contains_handle),
            UpdateAction::Splice { insert, .. } => insert.iter().any(Value::contains_handle),
            _ => false,
        }
    }
}

fn write_count(writer: &mut dyn BitWrite, count: usize) {
    Count::new(count as u64).ser(writer);
}

fn read_count(reader: &mut BitReader) -> Result<usize, SerdeErr> {
    Count::de(reader)?.to()
}

impl Serde for UpdateAction {
    fn ser(&self, writer: &mut dyn BitWrite) {
        match self {
            UpdateAction::SetValue(value) => {
                ActionTag::new(0).ser(writer);
                value.ser(writer);
            }
            UpdateAction::SetProperty { key, value } => {
                ActionTag::new(1).ser(writer);
                key.ser(writer);
                value.ser(writer);
            }
            UpdateAction::DeleteProperty { key } => {
                ActionTag::new(2).ser(writer);
                key.ser(writer);
            }
            UpdateAction::AddElements { values } => {
                ActionTag::new(3).ser(writer);
                values.ser(writer);
            }
            UpdateAction::RemoveElement { index } => {
                ActionTag::new(4).ser(writer);
                write_count(writer, *index);
            }
            UpdateAction::Clear => {
                ActionTag::new(5).ser(writer);
            }
            UpdateAction::Splice {
                start,
                delete_count,
                insert,
            } => {
                ActionTag::new(6).ser(writer);
                write_count(writer, *start);
                write_count(writer, *delete_count);
                insert.ser(writer);
            }
        }
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let tag: u8 = ActionTag::de(reader)?.to()?;
        Ok(match tag {
            0 => UpdateAction::SetValue(Value::de(reader)?),
            1 => UpdateAction::SetProperty {
                key: PropertyKey::de(reader)?,
                value: Value::de(reader)?,
            },
            2 => UpdateAction::DeleteProperty {
                key: PropertyKey::de(reader)?,
            },
            3 => UpdateAction::AddElements {
                values: Vec::de(reader)?,
            },
            4 => UpdateAction::RemoveElement {
                index: read_count(reader)?,
            },
            5 => UpdateAction::Clear,
            6 => UpdateAction::Splice {
                start: read_count(reader)?,
                delete_count: read_count(reader)?,
                insert: Vec::de(reader)?,
            },
            _ => {
                return Err(SerdeErr::InvalidTag {
                    type_name: "UpdateAction",
                    tag: tag as u64,
                })
            }
        })
    }
}

/// A mutation of one reference inside a batch.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateFragment {
    pub reference: ReferenceId,
    pub action: UpdateAction,
    /// The first argument carries the reference's full current value.
    pub collapsed: bool,
}

impl Serde for UpdateFragment {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.reference.ser(writer);
        self.collapsed.ser(writer);
        self.action.ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let reference = ReferenceId::de(reader)?;
        let collapsed = bool::de(reader)?;
        let action = UpdateAction::de(reader)?;
        Ok(Self {
            reference,
            action,
            collapsed,
        })
    }
}

/// Everything pending for one destination at flush time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateBatch {
    pub fragments: Vec<UpdateFragment>,
}

impl UpdateBatch {
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }
}

impl Serde for UpdateBatch {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.fragments.ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(Self {
            fragments: Vec::de(reader)?,
        })
    }
}

/// The state of a reference handed to a new subscriber.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceSnapshot {
    pub reference: ReferenceId,
    pub value: Value,
    pub declared_type: ValueType,
    pub sealed: bool,
    pub read_only: bool,
    pub stream_intermediate: bool,
    pub labels: Vec<String>,
}

impl Serde for ReferenceSnapshot {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.reference.ser(writer);
        self.value.ser(writer);
        self.declared_type.ser(writer);
        self.sealed.ser(writer);
        self.read_only.ser(writer);
        self.stream_intermediate.ser(writer);
        self.labels.ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(Self {
            reference: ReferenceId::de(reader)?,
            value: Value::de(reader)?,
            declared_type: ValueType::de(reader)?,
            sealed: bool::de(reader)?,
            read_only: bool::de(reader)?,
            stream_intermediate: bool::de(reader)?,
            labels: Vec::de(reader)?,
        })
    }
}

/// Why an origin refused a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefusalReason {
    NotFound,
    Anonymous,
    NoAssignedValue,
}

impl RefusalReason {
    pub fn describe(&self) -> &'static str {
        match self {
            RefusalReason::NotFound => "not found",
            RefusalReason::Anonymous => "anonymous",
            RefusalReason::NoAssignedValue => "no assigned value",
        }
    }
}

/// Answer to a `Subscribe`.
#[derive(Clone, Debug, PartialEq)]
pub enum SubscribeOutcome {
    Snapshot(ReferenceSnapshot),
    /// The receiver is not the origin; ask this endpoint instead.
    Redirect(Endpoint),
    Refused(RefusalReason),
}

impl Serde for SubscribeOutcome {
    fn ser(&self, writer: &mut dyn BitWrite) {
        match self {
            SubscribeOutcome::Snapshot(snapshot) => {
                UnsignedInteger::<2>::new(0).ser(writer);
                snapshot.ser(writer);
            }
            SubscribeOutcome::Redirect(endpoint) => {
                UnsignedInteger::<2>::new(1).ser(writer);
                endpoint.ser(writer);
            }
            SubscribeOutcome::Refused(reason) => {
                UnsignedInteger::<2>::new(2).ser(writer);
                let reason: u8 = match reason {
                    RefusalReason::NotFound => 0,
                    RefusalReason::Anonymous => 1,
                    RefusalReason::NoAssignedValue => 2,
                };
                UnsignedInteger::<2>::new(reason).ser(writer);
            }
        }
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let tag: u8 = UnsignedInteger::<2>::de(reader)?.to()?;
        match tag {
            0 => Ok(SubscribeOutcome::Snapshot(ReferenceSnapshot::de(reader)?)),
            1 => Ok(SubscribeOutcome::Redirect(Endpoint::de(reader)?)),
            2 => {
                let reason: u8 = UnsignedInteger::<2>::de(reader)?.to()?;
                let reason = match reason {
                    0 => RefusalReason::NotFound,
                    1 => RefusalReason::Anonymous,
                    2 => RefusalReason::NoAssignedValue,
                    _ => {
                        return Err(SerdeErr::InvalidTag {
                            type_name: "RefusalReason",
                            tag: reason as u64,
                        })
                    }
                };
                Ok(SubscribeOutcome::Refused(reason))
            }
            _ => Err(SerdeErr::InvalidTag {
                type_name: "SubscribeOutcome",
                tag: tag as u64,
            }),
        }
    }
}

/// Protocol messages exchanged between endpoints.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Presence announcement, flooded on connect.
    Hello { identity: Vec<u8> },
    Subscribe { reference: ReferenceId, request: u32 },
    SubscribeResponse { request: u32, outcome: SubscribeOutcome },
    Unsubscribe { reference: ReferenceId },
    Update(UpdateBatch),
}

impl Message {
    pub fn name(&self) -> &'static str {
        match self {
            Message::Hello { .. } => "hello",
            Message::Subscribe { .. } => "subscribe",
            Message::SubscribeResponse { .. } => "subscribe_response",
            Message::Unsubscribe { .. } => "unsubscribe",
            Message::Update(_) => "update",
        }
    }
}

impl Serde for Message {
    fn ser(&self, writer: &mut dyn BitWrite) {
        match self {
            Message::Hello { identity } => {
                MessageTag::new(0).ser(writer);
                identity.ser(writer);
            }
            Message::Subscribe { reference, request } => {
                MessageTag::new(1).ser(writer);
                reference.ser(writer);
                request.ser(writer);
            }
            Message::SubscribeResponse { request, outcome } => {
                MessageTag::new(2).ser(writer);
                request.ser(writer);
                outcome.ser(writer);
            }
            Message::Unsubscribe { reference } => {
                MessageTag::new(3).ser(writer);
                reference.ser(writer);
            }
            Message::Update(batch) => {
                MessageTag::new(4).ser(writer);
                batch.ser(writer);
            }
        }
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let tag: u8 = MessageTag::de(reader)?.to()?;
        Ok(match tag {
            0 => Message::Hello {
                identity: Vec::de(reader)?,
            },
            1 => Message::Subscribe {
                reference: ReferenceId::de(reader)?,
                request: u32::de(reader)?,
            },
            2 => Message::SubscribeResponse {
                request: u32::de(reader)?,
                outcome: SubscribeOutcome::de(reader)?,
            },
            3 => Message::Unsubscribe {
                reference: ReferenceId::de(reader)?,
            },
            4 => Message::Update(UpdateBatch::de(reader)?),
            _ => {
                return Err(SerdeErr::InvalidTag {
                    type_name: "Message",
                    tag: tag as u64,
                })
            }
        })
    }
}

/// Routing header plus message. `receiver` is `None` for flooded messages.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub sender: Endpoint,
    pub receiver: Option<Endpoint>,
    pub message: Message,
}

impl Envelope {
    pub fn to(sender: Endpoint, receiver: Endpoint, message: Message) -> Self {
        Self {
            sender,
            receiver: Some(receiver),
            message,
        }
    }

    pub fn flood(sender: Endpoint, message: Message) -> Self {
        Self {
            sender,
            receiver: None,
            message,
        }
    }
}

impl Serde for Envelope {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.sender.ser(writer);
        self.receiver.ser(writer);
        self.message.ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(Self {
            sender: Endpoint::de(reader)?,
            receiver: Option::de(reader)?,
            message: Message::de(reader)?,
        })
    }
}
