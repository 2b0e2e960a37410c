use typegraph_common::{Annotation, Annotations, TypeId, ValueType};

use crate::error::{EncodingError, EncodingResult};

const OVERRIDDEN_ABSENT: u8 = 0x00;
const OVERRIDDEN_PRESENT: u8 = 0x01;

pub fn encode_type_id(id: TypeId) -> [u8; 4] {
    id.to_be_bytes()
}

pub fn decode_type_id(bytes: &[u8]) -> EncodingResult<TypeId> {
    let bytes: [u8; 4] = bytes
        .try_into()
        .map_err(|_| EncodingError::MalformedKey("type id length"))?;
    Ok(TypeId::from_be_bytes(bytes))
}

fn annotation_to_byte(annotation: Annotation) -> u8 {
    match annotation {
        Annotation::Key => 0x01,
        Annotation::Unique => 0x02,
    }
}

fn annotation_from_byte(byte: u8) -> EncodingResult<Annotation> {
    match byte {
        0x01 => Ok(Annotation::Key),
        0x02 => Ok(Annotation::Unique),
        _ => Err(EncodingError::MalformedKey("unknown annotation byte")),
    }
}

/// Edge record value: optional overridden id followed by annotation bytes.
pub fn encode_edge_value(overridden: Option<TypeId>, annotations: &Annotations) -> Vec<u8> {
    let mut value = Vec::with_capacity(5 + annotations.len());
    match overridden {
        Some(id) => {
            value.push(OVERRIDDEN_PRESENT);
            value.extend_from_slice(&id.to_be_bytes());
        }
        None => value.push(OVERRIDDEN_ABSENT),
    }
    for annotation in annotations.iter() {
        value.push(annotation_to_byte(annotation));
    }
    value
}

pub fn decode_edge_value(bytes: &[u8]) -> EncodingResult<(Option<TypeId>, Annotations)> {
    let (overridden, rest) = match bytes.first() {
        Some(&OVERRIDDEN_ABSENT) => (None, &bytes[1..]),
        Some(&OVERRIDDEN_PRESENT) => {
            if bytes.len() < 5 {
                return Err(EncodingError::MalformedKey("edge value length"));
            }
            (Some(decode_type_id(&bytes[1..5])?), &bytes[5..])
        }
        _ => return Err(EncodingError::MalformedKey("edge value marker")),
    };
    let annotations = rest
        .iter()
        .map(|&b| annotation_from_byte(b))
        .collect::<EncodingResult<Annotations>>()?;
    Ok((overridden, annotations))
}

pub fn encode_bool(value: bool) -> [u8; 1] {
    [u8::from(value)]
}

pub fn decode_bool(bytes: &[u8]) -> EncodingResult<bool> {
    match bytes {
        [0x00] => Ok(false),
        [0x01] => Ok(true),
        _ => Err(EncodingError::MalformedKey("boolean value")),
    }
}

pub fn encode_value_type(value_type: ValueType) -> [u8; 1] {
    let byte = match value_type {
        ValueType::Boolean => 0x01,
        ValueType::Long => 0x02,
        ValueType::Double => 0x03,
        ValueType::String => 0x04,
        ValueType::DateTime => 0x05,
    };
    [byte]
}

pub fn decode_value_type(bytes: &[u8]) -> EncodingResult<ValueType> {
    match bytes {
        [0x01] => Ok(ValueType::Boolean),
        [0x02] => Ok(ValueType::Long),
        [0x03] => Ok(ValueType::Double),
        [0x04] => Ok(ValueType::String),
        [0x05] => Ok(ValueType::DateTime),
        _ => Err(EncodingError::MalformedKey("value type byte")),
    }
}
