use ratatui::layout::Rect;
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use tracing::trace;

use crate::filter::FacetOption;

pub const POPOVER_MIN_WIDTH: u16 = 24;
pub const POPOVER_MAX_HEIGHT: u16 = 20;
// Border top/bottom plus the key hint line
const POPOVER_CHROME_HEIGHT: u16 = 3;

/// UI events a component can subscribe to while it is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listener {
    /// Pointer press outside the given area.
    PointerDownOutside(Rect),
    Escape,
    /// Terminal resize or scroll of the underlying table.
    Reposition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ListenerId(u64);

#[derive(Debug, Default)]
struct Registered {
    next_id: u64,
    active: Vec<(ListenerId, Listener)>,
}

/// Listeners currently subscribed by on-screen components.
///
/// Shared between the model, which acquires listeners, and the controller, which
/// routes raw terminal events by looking at what is registered.
#[derive(Debug, Clone, Default)]
pub struct ListenerRegistry {
    inner: Rc<RefCell<Registered>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listeners`; they stay active until the returned guard is dropped.
    pub fn acquire(&self, listeners: &[Listener]) -> ListenerGuard {
        let mut inner = self.inner.borrow_mut();
        let mut ids = Vec::with_capacity(listeners.len());
        for listener in listeners {
            let id = ListenerId(inner.next_id);
            inner.next_id += 1;
            inner.active.push((id, *listener));
            ids.push(id);
        }
        trace!("Registered listeners {:?}", listeners);
        ListenerGuard {
            registry: self.clone(),
            ids,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn listens_for_escape(&self) -> bool {
        self.inner
            .borrow()
            .active
            .iter()
            .any(|(_, l)| *l == Listener::Escape)
    }

    pub fn wants_reposition(&self) -> bool {
        self.inner
            .borrow()
            .active
            .iter()
            .any(|(_, l)| *l == Listener::Reposition)
    }

    /// True when a pointer press at `(column, row)` falls outside a registered area.
    pub fn is_outside(&self, column: u16, row: u16) -> bool {
        self.inner.borrow().active.iter().any(|(_, l)| match l {
            Listener::PointerDownOutside(area) => {
                !area.contains(ratatui::layout::Position { x: column, y: row })
            }
            _ => false,
        })
    }

    fn update_area(&self, ids: &[ListenerId], area: Rect) {
        let mut inner = self.inner.borrow_mut();
        for (id, listener) in inner.active.iter_mut() {
            if ids.contains(id) && matches!(listener, Listener::PointerDownOutside(_)) {
                *listener = Listener::PointerDownOutside(area);
            }
        }
    }

    fn release(&self, ids: &[ListenerId]) {
        let mut inner = self.inner.borrow_mut();
        inner.active.retain(|(id, _)| !ids.contains(id));
    }
}

/// Releases its listeners when dropped.
#[derive(Debug)]
pub struct ListenerGuard {
    registry: ListenerRegistry,
    ids: Vec<ListenerId>,
}

impl ListenerGuard {
    pub fn update_area(&self, area: Rect) {
        self.registry.update_area(&self.ids, area);
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.registry.release(&self.ids);
        trace!("Released {} listeners", self.ids.len());
    }
}

/// Place a popover of `width` x `height` next to `anchor` inside `viewport`.
///
/// Prefers the space below the anchor, flips above when only that fits and otherwise
/// takes the larger side, shrinking the height to what is available.
pub fn place_popover(anchor: Rect, width: u16, height: u16, viewport: Rect) -> Rect {
    let width = width.min(viewport.width);
    let below = viewport.bottom().saturating_sub(anchor.bottom());
    let above = anchor.y.saturating_sub(viewport.y);

    let (y, height) = if height <= below {
        (anchor.bottom(), height)
    } else if height <= above {
        (anchor.y - height, height)
    } else if below >= above && below > 0 {
        (anchor.bottom(), below)
    } else if above > 0 {
        (viewport.y, above)
    } else {
        (viewport.y, height.min(viewport.height))
    };

    let mut x = anchor.x.max(viewport.x);
    if x.saturating_add(width) > viewport.right() {
        x = viewport.right().saturating_sub(width).max(viewport.x);
    }
    Rect::new(x, y, width, height)
}

/// Facet option picker for one column.
#[derive(Debug)]
pub struct FilterPopover {
    pub column: String,
    pub options: Vec<FacetOption>,
    pub cursor: usize,
    pub offset: usize,
    pub area: Rect,
    listeners: ListenerGuard,
}

impl FilterPopover {
    pub fn open(
        registry: &ListenerRegistry,
        column: &str,
        options: Vec<FacetOption>,
        anchor: Rect,
        viewport: Rect,
    ) -> Self {
        let listeners = registry.acquire(&[
            Listener::PointerDownOutside(Rect::default()),
            Listener::Escape,
            Listener::Reposition,
        ]);
        let mut popover = FilterPopover {
            column: column.to_string(),
            options,
            cursor: 0,
            offset: 0,
            area: Rect::default(),
            listeners,
        };
        popover.reposition(anchor, viewport);
        trace!(
            "Opened filter popover for {} with {} options at {:?}",
            popover.column,
            popover.options.len(),
            popover.area
        );
        popover
    }

    fn desired_size(&self) -> (u16, u16) {
        let content_width = self
            .options
            .iter()
            .map(|o| o.label.chars().count() + o.count.to_string().len() + 7)
            .max()
            .unwrap_or(0)
            .max(self.column.chars().count() + 4);
        // Clamp in usize, option counts can exceed u16
        let width = content_width
            .saturating_add(2)
            .clamp(POPOVER_MIN_WIDTH as usize, u16::MAX as usize) as u16;
        let height = self
            .options
            .len()
            .saturating_add(POPOVER_CHROME_HEIGHT as usize)
            .clamp(
                (POPOVER_CHROME_HEIGHT + 1) as usize,
                POPOVER_MAX_HEIGHT as usize,
            ) as u16;
        (width, height)
    }

    pub fn reposition(&mut self, anchor: Rect, viewport: Rect) {
        let (width, height) = self.desired_size();
        self.area = place_popover(anchor, width, height, viewport);
        self.listeners.update_area(self.area);
        self.clamp_scroll();
    }

    /// Rows available for options inside the current area.
    pub fn page_size(&self) -> usize {
        self.area.height.saturating_sub(POPOVER_CHROME_HEIGHT).max(1) as usize
    }

    pub fn move_cursor(&mut self, delta: isize) {
        if self.options.is_empty() {
            return;
        }
        let last = self.options.len() - 1;
        self.cursor = self.cursor.saturating_add_signed(delta).min(last);
        self.clamp_scroll();
    }

    fn clamp_scroll(&mut self) {
        let page = self.page_size();
        if self.cursor < self.offset {
            self.offset = self.cursor;
        } else if self.cursor >= self.offset + page {
            self.offset = self.cursor + 1 - page;
        }
    }

    pub fn selected(&self) -> Option<&FacetOption> {
        self.options.get(self.cursor)
    }

    pub fn visible_options(&self) -> &[FacetOption] {
        let end = (self.offset + self.page_size()).min(self.options.len());
        &self.options[self.offset.min(end)..end]
    }

    pub fn observed_tokens(&self) -> HashSet<String> {
        self.options.iter().map(|o| o.token.clone()).collect()
    }
}
