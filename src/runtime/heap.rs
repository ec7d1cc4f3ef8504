use std::any::Any;
use std::rc::Rc;

/// Something a value word can only refer to by index.
#[derive(Clone)]
pub enum HeapObject {
    String(String),
    Custom(Rc<dyn Any>),
}

impl std::fmt::Debug for HeapObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeapObject::String(s) => write!(f, "String({:?})", s),
            HeapObject::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Reference objects of one VM run. Grows only; everything is dropped with
/// the VM.
#[derive(Debug, Clone, Default)]
pub struct Heap {
    objects: Vec<HeapObject>,
}

impl Heap {
    /// A heap whose first entries are the chunk's string pool, so a string
    /// literal's pool index is also its heap index.
    pub fn with_strings(strings: &[String]) -> Self {
        Heap {
            objects: strings.iter().cloned().map(HeapObject::String).collect(),
        }
    }

    pub fn push_string(&mut self, value: String) -> usize {
        self.objects.push(HeapObject::String(value));
        self.objects.len() - 1
    }

    pub fn push_custom(&mut self, value: Rc<dyn Any>) -> usize {
        self.objects.push(HeapObject::Custom(value));
        self.objects.len() - 1
    }

    pub fn string(&self, index: usize) -> Option<&str> {
        match self.objects.get(index)? {
            HeapObject::String(s) => Some(s),
            HeapObject::Custom(_) => None,
        }
    }

    pub fn custom(&self, index: usize) -> Option<&Rc<dyn Any>> {
        match self.objects.get(index)? {
            HeapObject::Custom(object) => Some(object),
            HeapObject::String(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_strings_keep_their_index() {
        let mut heap = Heap::with_strings(&["a".to_string(), "b".to_string()]);
        assert_eq!(heap.string(1), Some("b"));
        let index = heap.push_string("c".to_string());
        assert_eq!(index, 2);
        assert_eq!(heap.len(), 3);
    }

    #[test]
    fn test_kinds_do_not_mix() {
        let mut heap = Heap::default();
        let s = heap.push_string("text".to_string());
        let c = heap.push_custom(Rc::new(42_u32));
        assert!(heap.custom(s).is_none());
        assert!(heap.string(c).is_none());
        assert_eq!(heap.custom(c).and_then(|o| o.downcast_ref::<u32>()), Some(&42));
    }
}
