//! Record types shared by the unit tests.

use chrono::{DateTime, Utc};

use crate::error::DbError;
use crate::hydrate::{ParamWriter, RowReader};
use crate::record::{Record, RecordDescriptor};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Address {
    pub city: String,
    pub zip: Option<String>,
}

impl Record for Address {
    fn descriptor() -> RecordDescriptor {
        RecordDescriptor::new("address")
            .field::<String>("city")
            .field::<Option<String>>("zip")
    }

    fn write_values(&self, out: &mut ParamWriter) {
        out.push(&self.city);
        out.push(&self.zip);
    }

    fn read_values(&mut self, row: &mut RowReader<'_>) -> Result<(), DbError> {
        row.read(&mut self.city)?;
        row.read(&mut self.zip)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub address: Option<Address>,
}

impl Record for Person {
    fn descriptor() -> RecordDescriptor {
        RecordDescriptor::new("person")
            .field::<i64>("id")
            .field::<String>("name")
            .optional::<Address>("address")
    }

    fn write_values(&self, out: &mut ParamWriter) {
        out.push(&self.id);
        out.push(&self.name);
        out.optional(self.address.as_ref());
    }

    fn read_values(&mut self, row: &mut RowReader<'_>) -> Result<(), DbError> {
        row.read(&mut self.id)?;
        row.read(&mut self.name)?;
        row.optional(&mut self.address)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub home: Address,
    pub office: Option<Address>,
    pub orders: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub avatar: Vec<u8>,
}

impl Record for Customer {
    fn descriptor() -> RecordDescriptor {
        RecordDescriptor::new("customer")
            .field::<i64>("id")
            .column::<String>("name", "full_name")
            .nested::<Address>("home")
            .optional::<Address>("office")
            .list("orders")
            .field::<DateTime<Utc>>("created_at")
            .field::<Vec<u8>>("avatar")
    }

    fn write_values(&self, out: &mut ParamWriter) {
        out.push(&self.id);
        out.push(&self.name);
        out.nested(&self.home);
        out.optional(self.office.as_ref());
        out.push(&self.created_at);
        out.push(&self.avatar);
    }

    fn read_values(&mut self, row: &mut RowReader<'_>) -> Result<(), DbError> {
        row.read(&mut self.id)?;
        row.read(&mut self.name)?;
        row.nested(&mut self.home)?;
        row.optional(&mut self.office)?;
        row.read(&mut self.created_at)?;
        row.read(&mut self.avatar)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Site {
    pub label: Option<String>,
    pub city: String,
}

impl Record for Site {
    fn descriptor() -> RecordDescriptor {
        RecordDescriptor::new("site")
            .field::<Option<String>>("label")
            .field::<String>("city")
    }

    fn write_values(&self, out: &mut ParamWriter) {
        out.push(&self.label);
        out.push(&self.city);
    }

    fn read_values(&mut self, row: &mut RowReader<'_>) -> Result<(), DbError> {
        row.read(&mut self.label)?;
        row.read(&mut self.city)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Venue {
    pub id: i64,
    pub site: Option<Site>,
}

impl Record for Venue {
    fn descriptor() -> RecordDescriptor {
        RecordDescriptor::new("venue")
            .field::<i64>("id")
            .optional::<Site>("site")
    }

    fn write_values(&self, out: &mut ParamWriter) {
        out.push(&self.id);
        out.optional(self.site.as_ref());
    }

    fn read_values(&mut self, row: &mut RowReader<'_>) -> Result<(), DbError> {
        row.read(&mut self.id)?;
        row.optional(&mut self.site)
    }
}
