//! Downstream sink for finished pages.

use bulkhaul_types::StageError;

use crate::page::Page;

/// Receives pages from a [`PageBuilder`](crate::PageBuilder) or a filter.
///
/// `finish` signals that no more pages follow. `close` releases resources;
/// calling it without a prior `finish` abandons the stream.
pub trait PageOutput: Send {
    fn add(&mut self, page: Page) -> Result<(), StageError>;

    fn finish(&mut self) -> Result<(), StageError>;

    fn close(&mut self);
}

impl<T: PageOutput + ?Sized> PageOutput for &mut T {
    fn add(&mut self, page: Page) -> Result<(), StageError> {
        (**self).add(page)
    }

    fn finish(&mut self) -> Result<(), StageError> {
        (**self).finish()
    }

    fn close(&mut self) {
        (**self).close();
    }
}

impl<T: PageOutput + ?Sized> PageOutput for Box<T> {
    fn add(&mut self, page: Page) -> Result<(), StageError> {
        (**self).add(page)
    }

    fn finish(&mut self) -> Result<(), StageError> {
        (**self).finish()
    }

    fn close(&mut self) {
        (**self).close();
    }
}

/// Collects pages in memory.
impl PageOutput for Vec<Page> {
    fn add(&mut self, page: Page) -> Result<(), StageError> {
        self.push(page);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), StageError> {
        Ok(())
    }

    fn close(&mut self) {}
}
