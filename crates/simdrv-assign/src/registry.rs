use hashbrown::HashMap;
use simdrv_types::Name;

use crate::{AssignmentError, AssignmentTable};

/// Named assignment tables, created on first lookup.
#[derive(Debug, Default)]
pub struct ResourceAssignmentRegistry {
    tables: HashMap<Name, AssignmentTable>,
}

impl ResourceAssignmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the table called `name`, creating an empty one if needed.
    pub fn get_table(&mut self, name: Name) -> &mut AssignmentTable {
        self.tables.entry(name).or_insert_with(|| {
            tracing::debug!(table = %name, "assignment table created");
            AssignmentTable::new(name)
        })
    }

    /// Non-creating lookup.
    pub fn table(&self, name: Name) -> Option<&AssignmentTable> {
        self.tables.get(&name)
    }

    pub fn table_mut(&mut self, name: Name) -> Option<&mut AssignmentTable> {
        self.tables.get_mut(&name)
    }

    pub fn remove_table(&mut self, name: Name) -> Result<AssignmentTable, AssignmentError> {
        self.tables
            .remove(&name)
            .ok_or(AssignmentError::TableNotFound {
                table: name,
                op: "remove_table",
            })
    }

    pub fn contains_table(&self, name: Name) -> bool {
        self.tables.contains_key(&name)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
