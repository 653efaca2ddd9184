// CSV chunk encoding for inventory exports; one reusable buffer, no other state.
use bytes::Bytes;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use crate::core::error::{Error, ErrorKind};
use crate::core::model::InventoryRecord;

pub const HEADER: [&str; 10] = [
    "ID",
    "Name",
    "Region",
    "Resource Type",
    "Cloud Resource Type",
    "Cloud Account",
    "Account ID",
    "Namespace ID",
    "Discovered Timestamp",
    "Creation Timestamp",
];

const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
const TIMESTAMP_MICROS_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6]");

pub struct CsvEncoder {
    builder: csv::WriterBuilder,
    buf: Vec<u8>,
}

impl CsvEncoder {
    pub fn new() -> Self {
        let mut builder = csv::WriterBuilder::new();
        builder.terminator(csv::Terminator::CRLF);
        Self {
            builder,
            buf: Vec::with_capacity(256),
        }
    }

    pub fn emit_header(&mut self) -> Result<Bytes, Error> {
        self.encode(HEADER)
    }

    pub fn emit_row(&mut self, record: &InventoryRecord) -> Result<Bytes, Error> {
        let fields = row_fields(record)?;
        self.encode(&fields)
    }

    /// Encodes several records into a single chunk.
    pub fn emit_rows<'a, I>(&mut self, records: I) -> Result<Bytes, Error>
    where
        I: IntoIterator<Item = &'a InventoryRecord>,
    {
        let mut out = Vec::new();
        for record in records {
            out.extend_from_slice(&self.emit_row(record)?);
        }
        Ok(Bytes::from(out))
    }

    fn encode<I, T>(&mut self, fields: I) -> Result<Bytes, Error>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.buf.clear();
        {
            let mut writer = self.builder.from_writer(&mut self.buf);
            writer.write_record(fields).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to encode csv row")
                    .with_source(err)
            })?;
            writer.flush().map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to flush csv row")
                    .with_source(err)
            })?;
        }
        Ok(Bytes::copy_from_slice(&self.buf))
    }
}

impl Default for CsvEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn row_fields(record: &InventoryRecord) -> Result<[String; 10], Error> {
    Ok([
        record.provider_id.clone(),
        record.name.clone(),
        record.region_name.clone(),
        record.resource_type.clone(),
        record.cloud_resource_type.clone(),
        record.account_name.clone(),
        record.account_id.clone(),
        record.namespace_id.clone().unwrap_or_default(),
        format_timestamp(record.discovered_timestamp)?,
        format_timestamp(record.creation_timestamp)?,
    ])
}

/// Null timestamps become empty fields; microseconds appear only when nonzero.
pub fn format_timestamp(value: Option<OffsetDateTime>) -> Result<String, Error> {
    let Some(value) = value else {
        return Ok(String::new());
    };
    let format = if value.microsecond() == 0 {
        TIMESTAMP_FORMAT
    } else {
        TIMESTAMP_MICROS_FORMAT
    };
    value
        .to_offset(UtcOffset::UTC)
        .format(format)
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to format timestamp")
                .with_source(err)
        })
}
