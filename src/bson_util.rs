use crate::{
    bson::{Bson, Document, RawArrayBuf, RawBson, RawBsonRef, RawDocumentBuf},
    error::{Error, Result},
};

/// Coerce numeric types into an `i64` if it would be lossless to do so. If this Bson is not numeric
/// or the conversion would be lossy (e.g. 1.5 -> 1), this returns `None`.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn get_int(val: &Bson) -> Option<i64> {
    match *val {
        Bson::Int32(i) => Some(i64::from(i)),
        Bson::Int64(i) => Some(i),
        Bson::Double(f) if (f - (f as i64 as f64)).abs() <= f64::EPSILON => Some(f as i64),
        _ => None,
    }
}

/// The raw counterpart of [`get_int`].
pub(crate) fn get_int_raw(val: RawBsonRef<'_>) -> Option<i64> {
    match val {
        RawBsonRef::Int32(i) => Some(i64::from(i)),
        RawBsonRef::Int64(i) => Some(i),
        RawBsonRef::Double(f) => get_int(&Bson::Double(f)),
        _ => None,
    }
}

pub(crate) fn first_key(document: &Document) -> Option<&str> {
    document.keys().next().map(String::as_str)
}

/// Update documents must consist only of update operators.
pub(crate) fn update_document_check(update: &Document) -> Result<()> {
    match first_key(update) {
        Some(key) if key.starts_with('$') => Ok(()),
        _ => Err(Error::invalid_argument(
            "update document must have first key starting with '$'",
        )),
    }
}

/// Replacement documents must not contain update operators.
pub(crate) fn replacement_document_check(replacement: &Document) -> Result<()> {
    match first_key(replacement) {
        Some(key) if key.starts_with('$') => Err(Error::invalid_argument(
            "replacement document must have first key not starting with '$'",
        )),
        _ => Ok(()),
    }
}

/// The size in bytes of the provided document's entry in a BSON array at the given index.
pub(crate) fn array_entry_size_bytes(index: usize, doc_len: usize) -> usize {
    //   * type (1 byte)
    //   * number of decimal digits in key
    //   * null terminator for the key (1 byte)
    //   * size of value
    1 + num_decimal_digits(index) + 1 + doc_len
}

/// The number of digits in `n` in base 10.
fn num_decimal_digits(n: usize) -> usize {
    n.checked_ilog10().map_or(1, |digits| digits as usize + 1)
}

pub(crate) fn to_raw_array(docs: impl IntoIterator<Item = RawDocumentBuf>) -> RawBson {
    let mut array = RawArrayBuf::new();
    for doc in docs {
        array.push(doc);
    }
    RawBson::Array(array)
}

pub(crate) fn to_raw_document_array(docs: &[Document]) -> Result<RawBson> {
    let raw = docs
        .iter()
        .map(RawDocumentBuf::from_document)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(to_raw_array(raw))
}

pub(crate) fn extend_raw_document_buf(
    this: &mut RawDocumentBuf,
    other: RawDocumentBuf,
) -> Result<()> {
    for result in other.iter() {
        let (k, v) = result?;
        this.append(k, v.to_raw_bson());
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use crate::{
        bson::{doc, rawdoc, Bson},
        bson_util::{
            array_entry_size_bytes,
            get_int,
            num_decimal_digits,
            replacement_document_check,
            update_document_check,
        },
    };

    #[test]
    fn num_digits() {
        assert_eq!(num_decimal_digits(0), 1);
        assert_eq!(num_decimal_digits(1), 1);
        assert_eq!(num_decimal_digits(10), 2);
        assert_eq!(num_decimal_digits(15), 2);
        assert_eq!(num_decimal_digits(100), 3);
        assert_eq!(num_decimal_digits(125), 3);
    }

    #[test]
    fn array_entry_size() {
        let doc = rawdoc! { "x": 1 };
        let mut array = crate::bson::RawArrayBuf::new();
        array.push(doc.clone());
        // An array is its own length prefix and null terminator around the entries.
        assert_eq!(
            array.as_bytes().len(),
            4 + array_entry_size_bytes(0, doc.as_bytes().len()) + 1
        );
    }

    #[test]
    fn integer_coercion() {
        assert_eq!(get_int(&Bson::Double(2.0)), Some(2));
        assert_eq!(get_int(&Bson::Double(2.5)), None);
        assert_eq!(get_int(&Bson::Int64(7)), Some(7));
        assert_eq!(get_int(&Bson::String("7".to_string())), None);
    }

    #[test]
    fn update_and_replacement_checks() {
        assert!(update_document_check(&doc! { "$set": { "x": 1 } }).is_ok());
        assert!(update_document_check(&doc! { "x": 1 }).is_err());
        assert!(update_document_check(&doc! {}).is_err());
        assert!(replacement_document_check(&doc! { "x": 1 }).is_ok());
        assert!(replacement_document_check(&doc! {}).is_ok());
        assert!(replacement_document_check(&doc! { "$set": { "x": 1 } }).is_err());
    }
}
