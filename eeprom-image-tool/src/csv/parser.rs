use flash_eeprom::{RESERVED_ADDRESS, Variable};

use crate::EepromImage;
use crate::error::Error;
use crate::parse_number;

#[derive(Debug, serde::Deserialize)]
struct CsvRow {
    address: String,
    encoding: String,
    value: String,
}

/// Parse CSV content from a string into an [`EepromImage`].
pub(crate) fn parse_csv(content: &str) -> Result<EepromImage, Error> {
    let mut image = EepromImage { variables: vec![] };
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    for result in reader.deserialize() {
        let row: CsvRow = result?;
        image.variables.push(parse_row(row)?);
    }

    Ok(image)
}

fn parse_row(row: CsvRow) -> Result<Variable, Error> {
    let address = parse_number(&row.address)
        .ok()
        .and_then(|address| u16::try_from(address).ok())
        .ok_or_else(|| Error::InvalidAddress(row.address.clone()))?;
    if address == RESERVED_ADDRESS {
        return Err(Error::InvalidAddress(format!(
            "{} is reserved for empty slots",
            row.address
        )));
    }

    let value = parse_value(&row.value, &row.encoding)?;
    Ok(Variable { address, value })
}

macro_rules! parse_numeric {
    ($value:expr, $ty:ty) => {
        $value
            .parse::<$ty>()
            .map_err(|e| Error::InvalidValue(format!("invalid {} value: {}", stringify!($ty), e)))
    };
}

/// Every encoding ends up as the 16 bit value the typed accessors of the store would write.
fn parse_value(value: &str, encoding: &str) -> Result<u16, Error> {
    match encoding {
        "u16" => parse_numeric!(value, u16),
        "i16" => parse_numeric!(value, i16).map(i16::cast_unsigned),
        "u8" => parse_numeric!(value, u8).map(u16::from),
        "i8" => parse_numeric!(value, i8).map(|v| v.cast_unsigned() as u16),
        "bool" => match value {
            "true" | "1" => Ok(1),
            "false" | "0" => Ok(0),
            _ => Err(Error::InvalidValue(format!("invalid bool value: {value}"))),
        },
        "hex" => {
            let bytes = hex::decode(value)?;
            let bytes: [u8; 2] = bytes.try_into().map_err(|_| {
                Error::InvalidValue(format!("hex value '{value}' must be exactly 2 bytes"))
            })?;
            Ok(u16::from_be_bytes(bytes))
        }
        _ => Err(Error::InvalidEncoding(encoding.to_string())),
    }
}
