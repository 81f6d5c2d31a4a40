// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Walking the logs of an erase block
//!
//! A PEB is filled with consecutive full logs, each opened by a segment header
//! and spanning `log_pages` pages. The last full log may be incomplete: it is
//! then made of a segment header log followed by partial logs, each declaring
//! how many bytes it wrote. The walker first hops across full logs and then
//! across the partial logs of the last one, and reports the newest log found.

use device::Device;
use layout::{area, log_flags, LogFooter, LogHeader, SegmentHeader};
use log::{debug, trace};

use crate::{reader, Context, Error};

/// The most recent log found in a PEB
#[derive(Debug, Clone)]
pub struct FoundLog {
    pub peb_id: u64,
    /// First page of the most recent log
    pub start_page: u32,
    /// Header opening the most recent log
    pub header: LogHeader,
    /// Footer of the most recent log, when it has one that validates
    pub footer: Option<Box<LogFooter>>,
    /// Segment header opening the full log the most recent log belongs to
    pub segment: Box<SegmentHeader>,
}

impl FoundLog {
    /// Walk every log of `peb_id`, starting from the full log at `start_page`
    pub fn walk<D: Device>(
        ctx: &Context<'_, D>,
        peb_id: u64,
        start_page: u32,
        first: SegmentHeader,
    ) -> Result<Self, Error> {
        let (page, segment) = walk_full_logs(ctx, peb_id, start_page, first)?;
        walk_partial_logs(ctx, peb_id, page, segment)
    }

    /// Creation time of the volume this log was written for
    pub fn create_time(&self) -> u64 {
        self.header.create_time()
    }

    pub fn cno(&self) -> u64 {
        self.header.cno()
    }
}

/// Main and copy instances of one metadata structure
#[derive(Debug, Clone, Default)]
pub struct LogsPair {
    pub main: Option<FoundLog>,
    pub copy: Option<FoundLog>,
}

impl LogsPair {
    /// Store `log` as the main (`0`) or copy instance
    pub fn set(&mut self, copy: usize, log: Option<FoundLog>) {
        if copy == 0 {
            self.main = log;
        } else {
            self.copy = log;
        }
    }

    pub fn is_found(&self) -> bool {
        self.main.is_some() || self.copy.is_some()
    }

    /// The main instance, or the copy when the main one is missing
    pub fn latest(&self) -> Option<&FoundLog> {
        self.main.as_ref().or(self.copy.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &FoundLog> {
        self.main.iter().chain(self.copy.iter())
    }
}

/// Full log size in pages, rejecting values that cannot describe a log in this PEB
pub fn validate_log_pages(log_pages: u16, pages_per_peb: u32) -> Result<u32, Error> {
    if log_pages == 0 || log_pages == u16::MAX || u32::from(log_pages) > pages_per_peb {
        return Err(Error::Corrupted {
            what: "log size",
            detail: format!("{log_pages} pages in a PEB of {pages_per_peb} pages"),
        });
    }
    Ok(u32::from(log_pages))
}

/// Hop across consecutive full logs, returning the page and header of the last one
pub fn walk_full_logs<D: Device>(
    ctx: &Context<'_, D>,
    peb_id: u64,
    start_page: u32,
    first: SegmentHeader,
) -> Result<(u32, SegmentHeader), Error> {
    let pages_per_peb = ctx.geometry().pages_per_peb();
    let mut page = start_page;
    let mut current = first;

    loop {
        let log_pages = validate_log_pages(current.log_pages.get(), pages_per_peb)?;
        let next = page + log_pages;
        if next >= pages_per_peb {
            break;
        }

        match reader::read_segment_header(ctx, peb_id, next)? {
            Some(hdr) if hdr.create_time() == current.create_time() && hdr.seg_type == current.seg_type => {
                trace!("PEB {peb_id}: full log at page {next}");
                page = next;
                current = hdr;
            }
            Some(_) => {
                debug!("PEB {peb_id}: log at page {next} belongs to another segment");
                break;
            }
            None => break,
        }
    }

    Ok((page, current))
}

/// Bytes written by a segment header log: its footer knows, otherwise its areas tell
fn segment_log_bytes(segment: &SegmentHeader, footer: Option<&LogFooter>) -> u64 {
    match footer {
        Some(footer) => u64::from(footer.log_bytes.get()),
        None => LogHeader::Segment(Box::new(*segment)).areas_end(),
    }
}

fn read_footer<D: Device>(
    ctx: &Context<'_, D>,
    peb_id: u64,
    page: u32,
    header: &LogHeader,
) -> Result<Option<Box<LogFooter>>, Error> {
    match header.area(area::LOG_FOOTER) {
        Some(desc) => Ok(reader::read_log_footer(ctx, peb_id, page, desc)?.map(Box::new)),
        None => Ok(None),
    }
}

/// Hop across the partial logs following the full log at `start_page`
pub fn walk_partial_logs<D: Device>(
    ctx: &Context<'_, D>,
    peb_id: u64,
    start_page: u32,
    segment: SegmentHeader,
) -> Result<FoundLog, Error> {
    let pages_per_peb = ctx.geometry().pages_per_peb();
    let page_size = u64::from(ctx.geometry().page_size);
    let full_pages = validate_log_pages(segment.log_pages.get(), pages_per_peb)?;
    let full_bytes = u64::from(full_pages) * page_size;
    let upper = (start_page + full_pages).min(pages_per_peb);

    let mut page = start_page;
    let mut header = LogHeader::Segment(Box::new(segment));
    let mut footer = read_footer(ctx, peb_id, page, &header)?;
    let mut log_bytes = segment_log_bytes(&segment, footer.as_deref());

    loop {
        let consumed = u64::from(page - start_page) * page_size + log_bytes;
        if consumed >= full_bytes {
            break;
        }

        let step = (log_bytes / page_size).max(1);
        let Some(next) = u32::try_from(step).ok().and_then(|step| page.checked_add(step)) else {
            break;
        };
        if next >= upper {
            break;
        }

        let Some(partial) = reader::read_partial_log_header(ctx, peb_id, next)? else {
            break;
        };
        if partial.create_time.get() != segment.create_time() {
            debug!("PEB {peb_id}: partial log at page {next} belongs to another volume");
            break;
        }

        trace!("PEB {peb_id}: partial log at page {next}, {} bytes", partial.log_bytes.get());
        log_bytes = u64::from(partial.log_bytes.get());
        page = next;
        header = LogHeader::Partial(Box::new(partial));
        footer = if header.flags() & log_flags::HAS_FOOTER != 0 {
            read_footer(ctx, peb_id, page, &header)?
        } else {
            None
        };
    }

    Ok(FoundLog {
        peb_id,
        start_page: page,
        header,
        footer,
        segment: Box::new(segment),
    })
}
