pub mod claim;
pub mod instance;
pub mod template;

use schemars::r#gen::SchemaGenerator;
use schemars::schema::{
    ArrayValidation, InstanceType, Schema, SchemaObject, SingleOrVec,
};

pub const GROUP: &str = "tmax.io";
pub const VERSION: &str = "v1";

fn preserve_unknown_object() -> SchemaObject {
    let mut obj = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    obj.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".into(),
        serde_json::Value::Bool(true),
    );
    obj
}

/// Schema for a list of arbitrary cluster objects kept verbatim.
pub(crate) fn raw_object_list(_: &mut SchemaGenerator) -> Schema {
    Schema::Object(SchemaObject {
        instance_type: Some(InstanceType::Array.into()),
        array: Some(Box::new(ArrayValidation {
            items: Some(SingleOrVec::Single(Box::new(
                preserve_unknown_object().into(),
            ))),
            ..Default::default()
        })),
        ..Default::default()
    })
}
