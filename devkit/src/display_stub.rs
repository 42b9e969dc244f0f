/*!
In-memory character display

Behaves like a 16x2 LCD: fixed rows and columns, `set_line` rejects rows
past the end. The screen content is shared between clones.
*/

use parking_lot::Mutex;
use rackwatch_core::{CharacterDisplay, DisplayError};
use std::sync::Arc;

#[derive(Clone)]
pub struct MemoryDisplay {
    rows: usize,
    columns: usize,
    screen: Arc<Mutex<Vec<String>>>,
    clears: Arc<Mutex<usize>>,
}

impl MemoryDisplay {
    pub fn new(rows: usize, columns: usize) -> Self {
        Self {
            rows,
            columns,
            screen: Arc::new(Mutex::new(vec![String::new(); rows])),
            clears: Arc::new(Mutex::new(0)),
        }
    }

    pub fn lcd_16x2() -> Self {
        Self::new(2, 16)
    }

    pub fn screen(&self) -> Vec<String> {
        self.screen.lock().clone()
    }

    pub fn clears(&self) -> usize {
        *self.clears.lock()
    }
}

impl CharacterDisplay for MemoryDisplay {
    fn rows(&self) -> usize {
        self.rows
    }

    fn columns(&self) -> usize {
        self.columns
    }

    fn clear(&mut self) -> Result<(), DisplayError> {
        *self.screen.lock() = vec![String::new(); self.rows];
        *self.clears.lock() += 1;
        Ok(())
    }

    fn write_row(&mut self, row: usize, text: &str) -> Result<(), DisplayError> {
        self.screen.lock()[row] = text.to_string();
        Ok(())
    }
}
