//! Index descriptions for `createIndexes`.

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    bson::{Bson, Document},
    options::IndexOptions,
};

/// Specifies the fields and options for an index.
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, Serialize, PartialEq)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct IndexModel {
    /// The indexed fields, each mapped to its index type (`1`, `-1`, `"text"`, ...).
    #[serde(rename = "key")]
    #[builder(!default)]
    pub keys: Document,

    /// The options for the index.
    #[serde(flatten)]
    pub options: Option<IndexOptions>,
}

impl IndexModel {
    /// The name the server gives an index created without one: each key and its type joined
    /// with `_`, so `{ a: 1, b: -1 }` becomes `a_1_b_-1`.
    pub fn default_name(&self) -> String {
        fn format_kv((key, value): (&String, &Bson)) -> String {
            match value {
                Bson::String(s) => format!("{key}_{s}"),
                other => format!("{key}_{other}"),
            }
        }
        self.keys
            .iter()
            .map(format_kv)
            .collect::<Vec<_>>()
            .join("_")
    }

    /// If the caller did not specify a name, generate and set it. Otherwise, do nothing.
    pub(crate) fn update_name(&mut self) {
        if self.name().is_none() {
            let name = self.default_name();
            self.options.get_or_insert_with(IndexOptions::default).name = Some(name);
        }
    }

    /// The explicit or generated name of the index.
    pub fn name(&self) -> Option<&str> {
        self.options.as_ref().and_then(|o| o.name.as_deref())
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::IndexModel;
    use crate::{bson::doc, options::IndexOptions};

    #[test]
    fn default_name_joins_keys_and_types() {
        let mut model = IndexModel::builder().keys(doc! { "a": 1, "b": -1 }).build();
        assert_eq!(model.name(), None);
        model.update_name();
        assert_eq!(model.name(), Some("a_1_b_-1"));
    }

    #[test]
    fn default_name_uses_string_types_verbatim() {
        let model = IndexModel::builder()
            .keys(doc! { "title": "text", "loc": "2dsphere" })
            .build();
        assert_eq!(model.default_name(), "title_text_loc_2dsphere");
    }

    #[test]
    fn explicit_name_is_kept() {
        let mut model = IndexModel::builder()
            .keys(doc! { "a": 1 })
            .options(IndexOptions::builder().name("by_a".to_string()).build())
            .build();
        model.update_name();
        assert_eq!(model.name(), Some("by_a"));
    }
}
