use std::path::Path;

use csv::Writer;

use crate::EepromImage;
use crate::error::Error;

/// Serialize the variables to a CSV file at the given `output_path`, in their original order.
pub(crate) fn write_csv<P: AsRef<Path>>(image: &EepromImage, output_path: P) -> Result<(), Error> {
    let mut wtr = Writer::from_path(output_path)?;
    write_records(&mut wtr, image)
}

/// Serialize the variables to CSV and return the content as a `String`.
pub(crate) fn write_csv_content(image: &EepromImage) -> Result<String, Error> {
    let mut wtr = Writer::from_writer(Vec::new());
    write_records(&mut wtr, image)?;
    let bytes = wtr
        .into_inner()
        .map_err(|e| Error::IoError(e.into_error()))?;
    String::from_utf8(bytes)
        .map_err(|e| Error::InvalidValue(format!("CSV output is not valid UTF-8: {}", e)))
}

fn write_records<W: std::io::Write>(wtr: &mut Writer<W>, image: &EepromImage) -> Result<(), Error> {
    wtr.write_record(["address", "encoding", "value"])?;

    for variable in &image.variables {
        wtr.write_record([
            format!("0x{:04X}", variable.address),
            "u16".to_string(),
            variable.value.to_string(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
