use capnp_types::*;
use std::io::Write;

const PERSON: &str = r#"
records:
  - name: Person
    data-words: 2
    ptr-words: 3
    fields:
      - name: name
        kind: group
        fields:
          - name: first
            kind: slot
            offset: 0
            type: text
          - name: last
            kind: slot
            offset: 1
            type: text
      - name: age
        kind: slot
        offset: 0
        type: uint8
        default: 18
      - name: score
        kind: slot
        offset: 1
        type: float64
        default: 1.5
      - name: friends
        kind: slot
        offset: 2
        type:
          list:
            struct: Person
      - name: placeholder
        kind: void
"#;

#[test]
fn parses_nested_fields() {
    let schema = Schema::from_yaml_str(PERSON).expect("schema parses");
    let person = schema.record("Person").expect("Person present");

    assert_eq!(person.extent(), Extent::new(2, 3));
    assert_eq!(person.fields.len(), 5);

    match &person.fields[0].kind {
        FieldKind::Group(group) => {
            assert!(!group.nullable);
            assert_eq!(group.fields.len(), 2);
            assert_eq!(group.fields[1].name, "last");
        }
        other => panic!("expected group, got {other:?}"),
    }

    assert_eq!(
        person.fields[1].kind,
        FieldKind::Slot(SlotSpec::new(0, TypeTag::Uint8).with_default(DefaultValue::Int(18)))
    );
    assert_eq!(
        person.fields[2].kind,
        FieldKind::Slot(SlotSpec::new(1, TypeTag::Float64).with_default(DefaultValue::Float(1.5)))
    );
    assert_eq!(
        person.fields[3].kind,
        FieldKind::Slot(SlotSpec::new(
            2,
            TypeTag::List(Box::new(TypeTag::Struct("Person".into())))
        ))
    );
    assert!(person.fields[4].is_void());
    assert!(!person.has_union());
}

#[test]
fn parses_union_members() {
    let text = r#"
records:
  - name: Shape
    data-words: 2
    discriminant-offset: 4
    fields:
      - name: area
        kind: slot
        offset: 0
        type: int32
      - name: circle
        kind: slot
        offset: 1
        type: int16
        discriminant-value: 0
      - name: square
        kind: slot
        offset: 1
        type: int16
        discriminant-value: 1
"#;
    let schema = Schema::from_yaml_str(text).expect("schema parses");
    let shape = schema.record("Shape").expect("Shape present");

    assert!(shape.has_union());
    assert_eq!(shape.discriminant_offset, Some(4));
    assert_eq!(shape.common_fields().count(), 1);
    let arms: Vec<_> = shape
        .union_fields()
        .map(|f| (f.name.as_str(), f.discriminant_value))
        .collect();
    assert_eq!(arms, vec![("circle", Some(0)), ("square", Some(1))]);
}

#[test]
fn rejects_duplicate_record_names() {
    let text = r#"
records:
  - name: A
  - name: A
"#;
    let err = Schema::from_yaml_str(text).unwrap_err();
    assert!(matches!(err, SchemaError::DuplicateRecord(name) if name == "A"));
}

#[test]
fn loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(PERSON.as_bytes()).expect("write schema");

    let schema = Schema::load(file.path()).expect("load schema");
    assert_eq!(schema.extent_of("Person"), Some(Extent::new(2, 3)));
    assert_eq!(schema.extent_of("Missing"), None);
}

#[test]
fn missing_file_reports_path() {
    let err = Schema::load(std::path::Path::new("/nonexistent/schema.yaml")).unwrap_err();
    assert!(err.to_string().contains("/nonexistent/schema.yaml"));
}

#[test]
fn merge_rejects_collisions() {
    let mut base = Schema::new(vec![RecordSpec::new("A", 1, 0)]);
    base.merge(Schema::new(vec![RecordSpec::new("B", 0, 1)]))
        .expect("distinct names merge");
    assert_eq!(base.records.len(), 2);

    let err = base
        .merge(Schema::new(vec![RecordSpec::new("A", 2, 0)]))
        .unwrap_err();
    assert!(matches!(err, SchemaError::DuplicateRecord(_)));
}
