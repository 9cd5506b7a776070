use super::error::BencodeError;
use super::value::Value;
use std::io::Write;

/// Encodes a bencode value to a byte vector.
///
/// Output is canonical: dictionary keys come out in lexicographic order
/// because [`Value::Dict`] is backed by a `BTreeMap`.
///
/// ```
/// use rsniff::bencode::{encode, Value};
///
/// assert_eq!(encode(&Value::Integer(42)).unwrap(), b"i42e");
/// assert_eq!(encode(&Value::string("spam")).unwrap(), b"4:spam");
/// ```
pub fn encode(value: &Value) -> Result<Vec<u8>, BencodeError> {
    let mut out = Vec::new();
    write_value(value, &mut out)?;
    Ok(out)
}

fn write_value<W: Write>(value: &Value, writer: &mut W) -> Result<(), BencodeError> {
    match value {
        Value::Integer(i) => {
            write!(writer, "i{}e", i)?;
        }
        Value::Bytes(b) => {
            write!(writer, "{}:", b.len())?;
            writer.write_all(b)?;
        }
        Value::List(items) => {
            writer.write_all(b"l")?;
            for item in items {
                write_value(item, writer)?;
            }
            writer.write_all(b"e")?;
        }
        Value::Dict(entries) => {
            writer.write_all(b"d")?;
            for (key, item) in entries {
                write!(writer, "{}:", key.len())?;
                writer.write_all(key)?;
                write_value(item, writer)?;
            }
            writer.write_all(b"e")?;
        }
    }
    Ok(())
}
