//! Struct bodies laid out over an address range.
use relift_ir::{isa::DataLayout, Type, TypeStore};

/// Fields placed one after another from `start`, each recorded with the
/// address it begins at.
#[derive(Debug, Clone)]
pub struct FieldList {
    start: u64,
    end: u64,
    fields: Vec<(u64, Type)>,
}

impl FieldList {
    pub fn new(start: u64) -> Self {
        Self {
            start,
            end: start,
            fields: Vec::new(),
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    /// First address past the last field.
    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn types(&self) -> Vec<Type> {
        self.fields.iter().map(|&(_, ty)| ty).collect()
    }

    /// Fills `[end, addr)` with one `i8` array.
    pub fn pad_to(&mut self, addr: u64, types: &mut TypeStore) {
        if addr > self.end {
            let len = (addr - self.end) as usize;
            let pad = types.make_array(Type::I8, len);
            self.fields.push((self.end, pad));
            self.end = addr;
        }
    }

    /// Fills `[end, addr)` with single `i8` fields.
    pub fn pad_bytes_to(&mut self, addr: u64) {
        while self.end < addr {
            self.fields.push((self.end, Type::I8));
            self.end += 1;
        }
    }

    /// Appends `ty` occupying `size` bytes. A function type is stored as a
    /// pointer to it. Bytes `ty` doesn't store are padded.
    pub fn push(&mut self, ty: Type, size: u64, types: &mut TypeStore, dl: &DataLayout) {
        let (ty, stored) = if types.is_func(ty) {
            (types.make_ptr(ty), dl.pointer_bytes() as u64)
        } else {
            let stored = dl.size_of(ty, types).map_or(size, |stored| stored as u64);
            (ty, stored)
        };

        self.fields.push((self.end, ty));
        let field_end = self.end + stored.min(size);
        self.end = field_end;
        self.pad_to(field_end + size.saturating_sub(stored), types);
    }

    /// Returns `true` if an unpacked struct of these fields puts every field
    /// at its address and spans exactly `[start, end)`.
    pub fn fits_natural_layout(&self, types: &TypeStore, dl: &DataLayout) -> bool {
        let mut offset = 0u64;
        let mut max_align = 1u64;
        for &(addr, ty) in &self.fields {
            let (Ok(size), Ok(align)) = (dl.size_of(ty, types), dl.align_of(ty, types)) else {
                return false;
            };
            let (size, align) = (size as u64, align as u64);

            offset = offset.next_multiple_of(align);
            if self.start + offset != addr {
                return false;
            }
            offset += size;
            max_align = max_align.max(align);
        }

        self.start + offset.next_multiple_of(max_align) == self.end
    }
}

#[cfg(test)]
mod tests {
    use relift_ir::builder::test_util::*;

    use super::*;

    #[test]
    fn padding_and_natural_layout() {
        let module = TestModuleBuilder::new().build();
        let dl = module.isa.data_layout();
        let mut types = module.types;

        let mut fields = FieldList::new(0x100);
        fields.push(Type::I32, 4, &mut types, &dl);
        fields.push(Type::I32, 4, &mut types, &dl);
        fields.push(Type::I64, 8, &mut types, &dl);
        assert_eq!(fields.end(), 0x110);
        assert!(fields.fits_natural_layout(&types, &dl));

        // The `i64` is misaligned without the padding.
        let mut fields = FieldList::new(0x100);
        fields.push(Type::I32, 4, &mut types, &dl);
        fields.push(Type::I64, 8, &mut types, &dl);
        assert!(!fields.fits_natural_layout(&types, &dl));

        let mut fields = FieldList::new(0x100);
        fields.push(Type::I8, 1, &mut types, &dl);
        fields.pad_to(0x104, &mut types);
        fields.push(Type::F32, 4, &mut types, &dl);
        fields.pad_bytes_to(0x10a);
        let pad = types.make_array(Type::I8, 3);
        assert_eq!(
            fields.types(),
            vec![Type::I8, pad, Type::F32, Type::I8, Type::I8]
        );
        assert_eq!(fields.end(), 0x10a);
    }

    #[test]
    fn long_double_tail() {
        let module = TestModuleBuilder::new().build();
        let dl = module.isa.data_layout();
        let mut types = module.types;

        let mut fields = FieldList::new(0);
        fields.push(Type::F80, 16, &mut types, &dl);
        let pad = types.make_array(Type::I8, 6);
        assert_eq!(fields.types(), vec![Type::F80, pad]);
        assert_eq!(fields.end(), 16);
    }
}
