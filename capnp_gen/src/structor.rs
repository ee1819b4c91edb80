//! Constructor synthesis.
//!
//! A [`StructConstructor`] is the callable contract of one record (or one
//! union arm of it): it takes one argument per top-level field, fills in
//! defaults for omitted ones, and packs the result through a
//! [`StructBuilder`]. Records whose layout is unsupported still get a
//! constructor with the same arguments; it fails every call with the
//! diagnostic captured at compile time.

use crate::builder::{StructBuffer, StructBuilder, StructTarget, WireBuilder};
use crate::defaults;
use crate::errors::{BuildError, ConstructError, ConstructResult, SynthesisError, UnsupportedRepresentation, ValueError};
use crate::flatten::{flatten, ArgShape, Argument, Discriminator, FlatRecord};
use crate::layout::{self, ExtentLookup, FieldClass, Layout, LowLevelField};
use crate::value::{encode_primitive, Value};
use capnp_types::{Extent, FieldSpec};
use std::fmt;

/// Values for one constructor call: positional values first, then named
/// ones. Anything not given takes the argument's default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    positional: Vec<Value>,
    named: Vec<(String, Value)>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the next positional value.
    pub fn push(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Sets an argument by name.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.push((name.into(), value.into()));
        self
    }
}

/// What a constructor does when invoked.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstructorBody {
    Packer(Layout),
    Stub(UnsupportedRepresentation),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructConstructor {
    name: String,
    record: String,
    arguments: Vec<Argument>,
    body: ConstructorBody,
}

/// Builds the constructor for `flat`, choosing a packer or a stub from the
/// layout outcome. Duplicate argument names are rejected outright.
pub fn synthesize(
    record: &str,
    constructor: &str,
    flat: FlatRecord,
    layout: Result<Layout, UnsupportedRepresentation>,
) -> Result<StructConstructor, SynthesisError> {
    let mut names: Vec<String> = Vec::new();
    for (idx, name) in flat.argument_names().enumerate() {
        let repeated = flat.argument_names().take(idx).any(|earlier| earlier == name);
        if repeated && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    if !names.is_empty() {
        return Err(SynthesisError::DuplicateArgumentName {
            record: record.to_string(),
            constructor: constructor.to_string(),
            names,
        });
    }

    let body = match layout {
        Ok(layout) => ConstructorBody::Packer(layout),
        Err(unsupported) => ConstructorBody::Stub(unsupported),
    };
    Ok(StructConstructor {
        name: constructor.to_string(),
        record: record.to_string(),
        arguments: flat.arguments,
        body,
    })
}

/// Runs the whole per-record pipeline for one constructor.
pub fn compile_record(
    record: &str,
    constructor: &str,
    fields: &[FieldSpec],
    extent: Extent,
    discriminator: Option<Discriminator>,
    records: &dyn ExtentLookup,
) -> Result<StructConstructor, SynthesisError> {
    let flat = flatten(fields, discriminator);
    let layout = layout::resolve(&flat, extent, records);
    synthesize(record, constructor, flat, layout)
}

impl StructConstructor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record(&self) -> &str {
        &self.record
    }

    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    pub fn argument_names(&self) -> impl Iterator<Item = &str> {
        self.arguments.iter().map(|a| a.name.as_str())
    }

    pub fn body(&self) -> &ConstructorBody {
        &self.body
    }

    pub fn layout(&self) -> Option<&Layout> {
        match &self.body {
            ConstructorBody::Packer(layout) => Some(layout),
            ConstructorBody::Stub(_) => None,
        }
    }

    pub fn is_stub(&self) -> bool {
        matches!(self.body, ConstructorBody::Stub(_))
    }

    /// Diagnostic of a stub constructor.
    pub fn diagnostic(&self) -> Option<&str> {
        match &self.body {
            ConstructorBody::Stub(unsupported) => Some(unsupported.message()),
            ConstructorBody::Packer(_) => None,
        }
    }

    /// Builds a record with the reference [`WireBuilder`].
    pub fn construct(&self, args: Arguments) -> ConstructResult<StructBuffer> {
        self.construct_with(|layout| WireBuilder::for_layout(&self.record, layout), args)
    }

    /// Builds a record with a builder obtained from `make_builder`, which is
    /// called once with this constructor's layout.
    pub fn construct_with<B, F>(&self, make_builder: F, args: Arguments) -> ConstructResult<StructBuffer>
    where
        B: StructBuilder,
        F: FnOnce(&Layout) -> B,
    {
        let layout = match &self.body {
            ConstructorBody::Packer(layout) => layout,
            ConstructorBody::Stub(unsupported) => {
                return Err(ConstructError::Unimplemented {
                    constructor: self.to_string(),
                    message: unsupported.message().to_string(),
                })
            }
        };

        let bound = self.bind(args)?;
        let mut builder = make_builder(layout);

        let mut slots = vec![Value::Null; layout.slot_count()];
        for (argument, value) in self.arguments.iter().zip(bound) {
            unpack(&argument.shape, value, &mut slots)?;
        }

        let raws = layout
            .fields()
            .iter()
            .map(|field| encode_field(&mut builder, layout, field, &slots[field.slot]))
            .collect::<ConstructResult<Vec<u64>>>()?;

        Ok(builder.pack(&raws)?)
    }

    fn bind(&self, args: Arguments) -> ConstructResult<Vec<Value>> {
        if args.positional.len() > self.arguments.len() {
            return Err(ConstructError::TooManyArguments {
                constructor: self.to_string(),
                expected: self.arguments.len(),
                found: args.positional.len(),
            });
        }

        let mut bound: Vec<Option<Value>> = vec![None; self.arguments.len()];
        for (slot, value) in bound.iter_mut().zip(args.positional) {
            *slot = Some(value);
        }
        for (name, value) in args.named {
            let idx = self
                .arguments
                .iter()
                .position(|a| a.name == name)
                .ok_or_else(|| ConstructError::UnknownArgument {
                    constructor: self.to_string(),
                    name: name.clone(),
                })?;
            if bound[idx].is_some() {
                return Err(ConstructError::ArgumentGivenTwice {
                    constructor: self.to_string(),
                    name,
                });
            }
            bound[idx] = Some(value);
        }

        Ok(bound
            .into_iter()
            .zip(&self.arguments)
            .map(|(value, argument)| value.unwrap_or_else(|| argument.default.clone()))
            .collect())
    }

    /// Call signature with default literals, e.g. `Point.new(x = 0, y = 0)`.
    pub fn signature(&self) -> String {
        let args: Vec<String> = self
            .arguments
            .iter()
            .map(|a| format!("{} = {}", a.name, a.default))
            .collect();
        format!("{}({})", self, args.join(", "))
    }
}

impl fmt::Display for StructConstructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.record, self.name)
    }
}

fn unpack(shape: &ArgShape, value: Value, slots: &mut [Value]) -> ConstructResult<()> {
    match shape {
        ArgShape::Void => {}
        ArgShape::Slot(id) => slots[*id] = value,
        ArgShape::Group { name, members } => {
            let items = match value {
                Value::Group(items) | Value::List(items) => items,
                other => {
                    return Err(ConstructError::GroupValue {
                        group: name.clone(),
                        found: other.kind_name(),
                    })
                }
            };
            if items.len() != members.len() {
                return Err(ConstructError::GroupArity {
                    group: name.clone(),
                    expected: members.len(),
                    found: items.len(),
                });
            }
            for (member, item) in members.iter().zip(items) {
                unpack(member, item, slots)?;
            }
        }
        ArgShape::Nullable { presence, value: slot, .. } => {
            if value.is_null() {
                slots[*presence] = Value::Int(0);
                slots[*slot] = Value::Null;
            } else {
                slots[*presence] = Value::Int(1);
                slots[*slot] = value;
            }
        }
    }
    Ok(())
}

fn encode_field<B: StructBuilder>(
    builder: &mut B,
    layout: &Layout,
    field: &LowLevelField,
    value: &Value,
) -> ConstructResult<u64> {
    let build = |source: BuildError| ConstructError::Build {
        field: field.name.clone(),
        source,
    };
    let mismatch = |expected: &str| ConstructError::Field {
        field: field.name.clone(),
        source: ValueError::TypeMismatch {
            expected: expected.to_string(),
            found: value.kind_name(),
        },
    };
    let offset = field.offset;

    match &field.class {
        FieldClass::Primitive(code) => {
            let raw = match layout.discriminator() {
                Some(disc) if disc.offset == offset => u64::from(disc.value),
                _ => encode_primitive(*code, value).map_err(|source| ConstructError::Field {
                    field: field.name.clone(),
                    source,
                })?,
            };
            Ok(defaults::apply(raw, field.xor_mask))
        }
        FieldClass::Text => match value {
            Value::Null => builder.allocate_text(offset, None).map_err(build),
            Value::Text(text) => builder.allocate_text(offset, Some(text.as_str())).map_err(build),
            _ => Err(mismatch("text")),
        },
        FieldClass::Data => match value {
            Value::Null => builder.allocate_data(offset, None).map_err(build),
            Value::Data(bytes) => builder.allocate_data(offset, Some(bytes.as_slice())).map_err(build),
            _ => Err(mismatch("data")),
        },
        FieldClass::Struct(target) => match value {
            Value::Null => builder.allocate_struct(offset, target, None).map_err(build),
            Value::Struct(buffer) => builder.allocate_struct(offset, target, Some(buffer)).map_err(build),
            _ => Err(mismatch(&format!("struct {}", target.name()))),
        },
        FieldClass::List(element) => match value {
            Value::Null => builder.allocate_list(offset, element, None).map_err(build),
            Value::List(items) => builder.allocate_list(offset, element, Some(items.as_slice())).map_err(build),
            _ => Err(mismatch("list")),
        },
        FieldClass::AnyPointer => match value {
            Value::Null => Ok(0),
            Value::Text(text) => builder.allocate_text(offset, Some(text.as_str())).map_err(build),
            Value::Data(bytes) => builder.allocate_data(offset, Some(bytes.as_slice())).map_err(build),
            Value::Struct(buffer) => {
                let target = StructTarget::new(buffer.record(), buffer.extent());
                builder.allocate_struct(offset, &target, Some(buffer)).map_err(build)
            }
            _ => Err(mismatch("any-pointer")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capnp_types::{DefaultValue, SlotSpec, TypeTag};
    use std::collections::HashMap;

    fn read(bytes: &[u8], at: usize, size: usize) -> u64 {
        let mut raw = [0u8; 8];
        raw[..size].copy_from_slice(&bytes[at..at + size]);
        u64::from_le_bytes(raw)
    }

    fn compile(fields: Vec<FieldSpec>, extent: Extent, disc: Option<Discriminator>) -> StructConstructor {
        compile_record("Rec", "new", &fields, extent, disc, &HashMap::<String, Extent>::new())
            .expect("synthesized")
    }

    #[test]
    fn omitted_arguments_take_defaults() {
        let ctor = compile(
            vec![
                FieldSpec::slot("a", SlotSpec::new(0, TypeTag::Int32)),
                FieldSpec::slot("b", SlotSpec::new(1, TypeTag::Int32)),
            ],
            Extent::new(1, 0),
            None,
        );
        let buffer = ctor.construct(Arguments::new().with("b", 9)).unwrap();
        assert_eq!(buffer.as_bytes(), &[0, 0, 0, 0, 9, 0, 0, 0]);
        assert_eq!(ctor.signature(), "Rec.new(a = 0, b = 0)");
    }

    #[test]
    fn default_xor_round_trip() {
        let ctor = compile(
            vec![FieldSpec::slot(
                "x",
                SlotSpec::new(0, TypeTag::Int32).with_default(DefaultValue::Int(42)),
            )],
            Extent::new(1, 0),
            None,
        );

        let omitted = ctor.construct(Arguments::new()).unwrap();
        assert_eq!(read(omitted.as_bytes(), 0, 4), 0);

        let given = ctor.construct(Arguments::new().push(7)).unwrap();
        assert_eq!(read(given.as_bytes(), 0, 4), 7 ^ 42);
    }

    #[test]
    fn nullable_group_round_trip() {
        let ctor = compile(
            vec![FieldSpec::nullable_group(
                "maybe",
                vec![
                    FieldSpec::slot("is_present", SlotSpec::new(0, TypeTag::Uint8)),
                    FieldSpec::slot("value", SlotSpec::new(1, TypeTag::Int64)),
                ],
            )],
            Extent::new(2, 0),
            None,
        );

        let absent = ctor.construct(Arguments::new()).unwrap();
        assert_eq!((read(absent.as_bytes(), 0, 1), read(absent.as_bytes(), 8, 8)), (0, 0));

        let zero = ctor.construct(Arguments::new().push(0)).unwrap();
        assert_eq!((read(zero.as_bytes(), 0, 1), read(zero.as_bytes(), 8, 8)), (1, 0));

        let five = ctor.construct(Arguments::new().with("maybe", 5)).unwrap();
        assert_eq!((read(five.as_bytes(), 0, 1), read(five.as_bytes(), 8, 8)), (1, 5));
    }

    #[test]
    fn discriminator_is_always_written() {
        let ctor = compile(
            vec![FieldSpec::slot("x", SlotSpec::new(0, TypeTag::Int32))],
            Extent::new(1, 0),
            Some(Discriminator { offset: 2, value: 3 }),
        );
        assert_eq!(ctor.argument_names().collect::<Vec<_>>(), vec!["x"]);

        let buffer = ctor.construct(Arguments::new().push(-1)).unwrap();
        assert_eq!(read(buffer.as_bytes(), 0, 4), 0xFFFF_FFFF);
        assert_eq!(read(buffer.as_bytes(), 4, 2), 3);
    }

    #[test]
    fn group_arguments_are_unpacked_positionally() {
        let ctor = compile(
            vec![FieldSpec::group(
                "pos",
                vec![
                    FieldSpec::slot("x", SlotSpec::new(0, TypeTag::Int16)),
                    FieldSpec::void("gap"),
                    FieldSpec::slot("y", SlotSpec::new(1, TypeTag::Int16)),
                ],
            )],
            Extent::new(1, 0),
            None,
        );

        let buffer = ctor
            .construct(Arguments::new().push(Value::group([Value::Int(1), Value::Int(2)])))
            .unwrap();
        assert_eq!(&buffer.as_bytes()[..4], &[1, 0, 2, 0]);

        let err = ctor
            .construct(Arguments::new().push(Value::group([Value::Int(1)])))
            .unwrap_err();
        assert_eq!(
            err,
            ConstructError::GroupArity {
                group: "pos".into(),
                expected: 2,
                found: 1,
            }
        );

        let err = ctor.construct(Arguments::new().push(3)).unwrap_err();
        assert!(matches!(err, ConstructError::GroupValue { found: "int", .. }));
    }

    #[test]
    fn binding_errors() {
        let ctor = compile(
            vec![FieldSpec::slot("a", SlotSpec::new(0, TypeTag::Int8))],
            Extent::new(1, 0),
            None,
        );

        assert!(matches!(
            ctor.construct(Arguments::new().push(1).push(2)),
            Err(ConstructError::TooManyArguments { expected: 1, found: 2, .. })
        ));
        assert!(matches!(
            ctor.construct(Arguments::new().with("zzz", 1)),
            Err(ConstructError::UnknownArgument { .. })
        ));
        assert!(matches!(
            ctor.construct(Arguments::new().push(1).with("a", 2)),
            Err(ConstructError::ArgumentGivenTwice { .. })
        ));
        assert!(matches!(
            ctor.construct(Arguments::new().push(1000)),
            Err(ConstructError::Field { .. })
        ));
    }

    #[test]
    fn unsupported_record_gets_a_stub() {
        let ctor = compile(
            vec![
                FieldSpec::slot("x", SlotSpec::new(0, TypeTag::Int32)),
                FieldSpec::slot("flag", SlotSpec::new(32, TypeTag::Bool)),
            ],
            Extent::new(1, 0),
            None,
        );
        assert!(ctor.is_stub());
        assert_eq!(ctor.argument_names().collect::<Vec<_>>(), vec!["x", "flag"]);

        let err = ctor.construct(Arguments::new().push(1)).unwrap_err();
        assert_eq!(
            err,
            ConstructError::Unimplemented {
                constructor: "Rec.new".into(),
                message: "unsupported field type: flag (bool)".into(),
            }
        );
    }

    #[test]
    fn duplicate_names_fail_synthesis() {
        let fields = vec![
            FieldSpec::slot("a", SlotSpec::new(0, TypeTag::Int8)),
            FieldSpec::slot("a", SlotSpec::new(1, TypeTag::Int8)),
        ];
        let err = compile_record(
            "Rec",
            "new",
            &fields,
            Extent::new(1, 0),
            None,
            &HashMap::<String, Extent>::new(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            SynthesisError::DuplicateArgumentName {
                record: "Rec".into(),
                constructor: "new".into(),
                names: vec!["a".into()],
            }
        );
    }

    #[test]
    fn pointer_fields_go_through_the_builder() {
        let ctor = compile(
            vec![
                FieldSpec::slot("name", SlotSpec::new(0, TypeTag::Text)),
                FieldSpec::slot("blob", SlotSpec::new(1, TypeTag::Data)),
            ],
            Extent::new(0, 2),
            None,
        );

        let empty = ctor.construct(Arguments::new()).unwrap();
        assert_eq!(empty.as_bytes(), &[0u8; 16]);

        let full = ctor
            .construct(Arguments::new().push("ab").push(Value::data(vec![1, 2, 3])))
            .unwrap();
        let bytes = full.as_bytes();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[16..19], b"ab\0");
        assert_eq!(&bytes[24..27], &[1, 2, 3]);

        let err = ctor.construct(Arguments::new().push(5)).unwrap_err();
        assert!(matches!(err, ConstructError::Field { .. }));
    }

    #[test]
    fn builder_errors_name_the_field() {
        let mut records = HashMap::new();
        records.insert("Child".to_string(), Extent::new(1, 0));
        let fields = vec![FieldSpec::slot("child", SlotSpec::new(0, TypeTag::Struct("Child".into())))];
        let ctor = compile_record("Rec", "new", &fields, Extent::new(0, 1), None, &records).unwrap();

        let wrong = StructBuffer::new("Other", Extent::new(1, 0), vec![0; 8]);
        let err = ctor.construct(Arguments::new().push(wrong)).unwrap_err();
        assert_eq!(
            err,
            ConstructError::Build {
                field: "child".into(),
                source: BuildError::StructTypeMismatch {
                    expected: "Child".into(),
                    found: "Other".into(),
                },
            }
        );
    }
}
