use refsync_serde::{BitReader, BitWrite, Serde, SerdeErr};

use crate::{
    reference::ReferenceId,
    value::{Value, ValueType},
};

/// The persisted form of a reference.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredReference {
    pub reference: ReferenceId,
    pub value: Value,
    pub declared_type: ValueType,
    pub sealed: bool,
    pub persistent: bool,
    pub stream_intermediate: bool,
    pub labels: Vec<String>,
}

impl Serde for StoredReference {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.reference.ser(writer);
        self.value.ser(writer);
        self.declared_type.ser(writer);
        self.sealed.ser(writer);
        self.persistent.ser(writer);
        self.stream_intermediate.ser(writer);
        self.labels.ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(Self {
            reference: ReferenceId::de(reader)?,
            value: Value::de(reader)?,
            declared_type: ValueType::de(reader)?,
            sealed: bool::de(reader)?,
            persistent: bool::de(reader)?,
            stream_intermediate: bool::de(reader)?,
            labels: Vec::de(reader)?,
        })
    }
}
