//! Typed memory regions exchanged with a security context.
//!
//! Every call into a [`SecurityContext`](crate::provider::SecurityContext)
//! passes one or two fixed-arity sets. Unused slots are present as
//! [`BufferKind::Empty`], never omitted, and a slot's region is owned by the
//! set so that a provider can hand unconsumed bytes back as
//! [`BufferKind::Extra`] without copying.

use std::ops::{Index, IndexMut};

use bytes::BytesMut;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Empty,
    Data,
    Token,
    Header,
    Trailer,
    Extra,
    Alert,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer {
    kind: BufferKind,
    data: BytesMut,
}

impl Buffer {
    pub fn empty() -> Self {
        Self {
            kind: BufferKind::Empty,
            data: BytesMut::new(),
        }
    }

    pub fn new(kind: BufferKind, data: BytesMut) -> Self {
        Self { kind, data }
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut BytesMut {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn set(&mut self, kind: BufferKind, data: BytesMut) {
        self.kind = kind;
        self.data = data;
    }

    /// Takes the region out, leaving an EMPTY slot behind.
    pub fn take(&mut self) -> BytesMut {
        self.kind = BufferKind::Empty;
        std::mem::take(&mut self.data)
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::empty()
    }
}

/// Ordered, fixed-arity collection of [`Buffer`] slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSet<const N: usize> {
    slots: [Buffer; N],
}

impl<const N: usize> BufferSet<N> {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Buffer::empty()),
        }
    }

    pub fn from_slots(slots: [Buffer; N]) -> Self {
        Self { slots }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Buffer> {
        self.slots.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Buffer> {
        self.slots.iter_mut()
    }

    /// Index of the first slot of `kind`.
    pub fn position(&self, kind: BufferKind) -> Option<usize> {
        self.slots.iter().position(|slot| slot.kind == kind)
    }

    pub fn find(&self, kind: BufferKind) -> Option<&Buffer> {
        self.slots.iter().find(|slot| slot.kind == kind)
    }

    /// Removes the region of the first slot of `kind`, if any.
    pub fn take(&mut self, kind: BufferKind) -> Option<BytesMut> {
        self.slots
            .iter_mut()
            .find(|slot| slot.kind == kind)
            .map(Buffer::take)
    }

    /// Total length of every non-empty slot, in order.
    pub fn total_len(&self) -> usize {
        self.slots.iter().map(Buffer::len).sum()
    }
}

impl<const N: usize> Default for BufferSet<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Index<usize> for BufferSet<N> {
    type Output = Buffer;

    fn index(&self, index: usize) -> &Buffer {
        &self.slots[index]
    }
}

impl<const N: usize> IndexMut<usize> for BufferSet<N> {
    fn index_mut(&mut self, index: usize) -> &mut Buffer {
        &mut self.slots[index]
    }
}

/// TOKEN(staged bytes), EMPTY.
pub fn token_input(staged: BytesMut) -> BufferSet<2> {
    BufferSet::from_slots([Buffer::new(BufferKind::Token, staged), Buffer::empty()])
}

/// TOKEN(empty), ALERT(empty).
pub fn handshake_output() -> BufferSet<2> {
    BufferSet::from_slots([
        Buffer::new(BufferKind::Token, BytesMut::new()),
        Buffer::new(BufferKind::Alert, BytesMut::new()),
    ])
}

/// DATA(ciphertext), EMPTY, EMPTY, EMPTY.
pub fn decrypt_input(ciphertext: BytesMut) -> BufferSet<4> {
    BufferSet::from_slots([
        Buffer::new(BufferKind::Data, ciphertext),
        Buffer::empty(),
        Buffer::empty(),
        Buffer::empty(),
    ])
}

/// HEADER(empty), DATA(plaintext), TRAILER(empty).
pub fn encrypt_input(plaintext: BytesMut, header: usize, trailer: usize) -> BufferSet<3> {
    BufferSet::from_slots([
        Buffer::new(BufferKind::Header, BytesMut::with_capacity(header)),
        Buffer::new(BufferKind::Data, plaintext),
        Buffer::new(BufferKind::Trailer, BytesMut::with_capacity(trailer)),
    ])
}

/// TOKEN(empty).
pub fn shutdown_output() -> BufferSet<1> {
    BufferSet::from_slots([Buffer::new(BufferKind::Token, BytesMut::new())])
}
