//! String interning (spec.md §4.A).
//!
//! Every string that flows through the library — identifiers, file names,
//! semantic names — is interned once into a dense `u32` ID space shared by
//! every repo added to a given [`StringIdMap`].

/// A dense index into a [`StringIdMap`]'s intern table. `StringId::INVALID`
/// denotes "no string".
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId(u32);

impl StringId {
    pub const INVALID: StringId = StringId(0xFFFF_FFFF);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    fn index(self) -> usize {
        self.0 as usize
    }

    /// Exposes the dense index for serialization (spec.md §6.3 item 4).
    pub(crate) fn raw(self) -> u32 {
        self.0
    }

    pub(crate) fn from_raw(raw: u32) -> Self {
        StringId(raw)
    }
}

/// Case-sensitive, whitespace-significant string interner.
///
/// IDs are dense and monotonic: the Nth unique string interned gets ID
/// `N - 1`, and `try_get`/`get` never invalidate a previously issued ID.
#[derive(Debug, Default, Clone)]
pub struct StringIdMap {
    strings: Vec<Box<str>>,
    lookup: hashbrown::HashMap<Box<str>, StringId>,
}

impl StringIdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `s`, returning its existing ID if already present.
    pub fn get_or_add(&mut self, s: &str) -> StringId {
        if let Some(id) = self.lookup.get(s) {
            return *id;
        }

        let id = StringId(self.strings.len() as u32);
        self.strings.push(s.into());
        self.lookup.insert(s.into(), id);
        id
    }

    /// Pure lookup; does not intern.
    pub fn try_get(&self, s: &str) -> Option<StringId> {
        self.lookup.get(s).copied()
    }

    /// Resolves `id` back to its string.
    ///
    /// # Panics
    ///
    /// Panics (debug-checked) if `id` was not issued by this map.
    pub fn get(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Serializable view of the intern table: `offsets` holds `(offset,
    /// length)` pairs into `data`, two `u32`s per interned string, in
    /// insertion order.
    pub fn export(&self) -> StringIdMapDef {
        let mut offsets = Vec::with_capacity(self.strings.len() * 2);
        let mut data = Vec::new();

        for s in &self.strings {
            offsets.push(data.len() as u32);
            offsets.push(s.len() as u32);
            data.extend_from_slice(s.as_bytes());
        }

        StringIdMapDef { offsets, data }
    }
}

/// Serializable form of a [`StringIdMap`] (spec.md §6.3 item 5).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StringIdMapDef {
    pub offsets: Vec<u32>,
    pub data: Vec<u8>,
}

impl StringIdMapDef {
    /// Reconstructs a [`StringIdMap`] from a serialized view.
    pub fn into_map(self) -> StringIdMap {
        let mut strings = Vec::with_capacity(self.offsets.len() / 2);
        let mut lookup = hashbrown::HashMap::new();

        for pair in self.offsets.chunks_exact(2) {
            let (offset, length) = (pair[0] as usize, pair[1] as usize);
            let s: Box<str> = std::str::from_utf8(&self.data[offset..offset + length])
                .expect("corrupt string table")
                .into();
            lookup.insert(s.clone(), StringId(strings.len() as u32));
            strings.push(s);
        }

        StringIdMap { strings, lookup }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_get_or_add() {
        let mut map = StringIdMap::new();
        let id = map.get_or_add("hello");
        assert_eq!(map.get(id), "hello");
    }

    #[test]
    fn repeated_interning_returns_the_same_id() {
        let mut map = StringIdMap::new();
        let a = map.get_or_add("Color");
        let b = map.get_or_add("Color");
        assert_eq!(a, b);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn is_case_and_whitespace_sensitive() {
        let mut map = StringIdMap::new();
        let a = map.get_or_add("Color");
        let b = map.get_or_add("color");
        let c = map.get_or_add("Color ");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn try_get_does_not_intern() {
        let mut map = StringIdMap::new();
        assert_eq!(map.try_get("missing"), None);
        assert_eq!(map.len(), 0);
        let id = map.get_or_add("present");
        assert_eq!(map.try_get("present"), Some(id));
    }

    #[test]
    fn ids_are_dense_and_offsets_length_matches() {
        let mut map = StringIdMap::new();
        map.get_or_add("a");
        map.get_or_add("b");
        map.get_or_add("c");
        let def = map.export();
        assert_eq!(def.offsets.len(), 2 * 3);
    }

    #[test]
    fn export_then_import_round_trips() {
        let mut map = StringIdMap::new();
        let ids: Vec<_> = ["alpha", "beta", "gamma"]
            .iter()
            .map(|s| map.get_or_add(s))
            .collect();

        let def = map.export();
        let restored = def.into_map();

        for (id, s) in ids.iter().zip(["alpha", "beta", "gamma"]) {
            assert_eq!(restored.get(*id), s);
        }
    }
}
