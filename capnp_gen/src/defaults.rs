/* Default-value encoding
 *
 * A fixed-width field with an explicit schema default D stores `V ^ D`
 * instead of V, so the all-zero body always decodes to the declared
 * defaults. Fields without an explicit default store V unchanged, and
 * pointer fields never take part: an absent pointer simply stays null. */

use crate::errors::UnsupportedRepresentation;
use crate::layout::FieldClass;
use crate::value::{encode_primitive, Value};
use capnp_types::SlotSpec;

/// XOR mask for a placed slot, or `None` when the slot stores raw values.
pub fn xor_mask(
    name: &str,
    slot: &SlotSpec,
    class: &FieldClass,
) -> Result<Option<u64>, UnsupportedRepresentation> {
    let (FieldClass::Primitive(code), Some(default)) = (class, &slot.default) else {
        return Ok(None);
    };
    encode_primitive(*code, &Value::from(default))
        .map(Some)
        .map_err(|err| {
            UnsupportedRepresentation::new(format!("default {default} of field {name} is invalid: {err}"))
        })
}

/// Applies an optional mask to raw slot bits.
pub fn apply(raw: u64, mask: Option<u64>) -> u64 {
    match mask {
        Some(mask) => raw ^ mask,
        None => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::PackCode;
    use capnp_types::{DefaultValue, TypeTag};

    #[test]
    fn integer_default_mask() {
        let slot = SlotSpec::new(0, TypeTag::Int32).with_default(DefaultValue::Int(42));
        let mask = xor_mask("x", &slot, &FieldClass::Primitive(PackCode::Int32)).unwrap();
        assert_eq!(mask, Some(42));
        assert_eq!(apply(42, mask), 0);
        assert_eq!(apply(7, mask), 7 ^ 42);
    }

    #[test]
    fn float_default_uses_bit_pattern() {
        let slot = SlotSpec::new(0, TypeTag::Float64).with_default(DefaultValue::Float(2.5));
        let mask = xor_mask("f", &slot, &FieldClass::Primitive(PackCode::Float64)).unwrap();
        assert_eq!(mask, Some(2.5f64.to_bits()));
    }

    #[test]
    fn no_mask_without_explicit_default_or_for_pointers() {
        let plain = SlotSpec::new(0, TypeTag::Int32);
        assert_eq!(
            xor_mask("x", &plain, &FieldClass::Primitive(PackCode::Int32)).unwrap(),
            None
        );

        let text = SlotSpec::new(0, TypeTag::Text).with_default(DefaultValue::Text("hi".into()));
        assert_eq!(xor_mask("t", &text, &FieldClass::Text).unwrap(), None);
        assert_eq!(apply(9, None), 9);
    }

    #[test]
    fn ill_typed_default_is_unsupported() {
        let slot = SlotSpec::new(0, TypeTag::Uint8).with_default(DefaultValue::Int(300));
        let err = xor_mask("small", &slot, &FieldClass::Primitive(PackCode::UInt8)).unwrap_err();
        assert!(err.message().contains("field small"));
    }

    #[test]
    fn float32_default_beyond_range_is_unsupported() {
        let slot = SlotSpec::new(0, TypeTag::Float32).with_default(DefaultValue::Float(1e300));
        let err = xor_mask("ratio", &slot, &FieldClass::Primitive(PackCode::Float32)).unwrap_err();
        assert!(err.message().contains("field ratio"));
    }
}
