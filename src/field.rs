use crate::step::{Step, WriteStep};
use crate::sync::{AtomicU64, Ordering};
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

/// A value that fits in one machine word and can live in a [`Field`].
///
/// 可以放入一个机器字并存放在 [`Field`] 中的值。
pub trait Word: Copy {
    fn into_bits(self) -> u64;
    fn from_bits(bits: u64) -> Self;
}

macro_rules! impl_word_for_int {
    ($($t:ty),*) => {
        $(
            impl Word for $t {
                #[inline(always)]
                fn into_bits(self) -> u64 {
                    self as u64
                }

                #[inline(always)]
                fn from_bits(bits: u64) -> Self {
                    bits as $t
                }
            }
        )*
    };
}

impl_word_for_int!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

impl Word for bool {
    #[inline(always)]
    fn into_bits(self) -> u64 {
        self as u64
    }

    #[inline(always)]
    fn from_bits(bits: u64) -> Self {
        bits != 0
    }
}

impl<T> Word for *mut T {
    #[inline(always)]
    fn into_bits(self) -> u64 {
        self as usize as u64
    }

    #[inline(always)]
    fn from_bits(bits: u64) -> Self {
        bits as usize as *mut T
    }
}

impl<T> Word for *const T {
    #[inline(always)]
    fn into_bits(self) -> u64 {
        self as usize as u64
    }

    #[inline(always)]
    fn from_bits(bits: u64) -> Self {
        bits as usize as *const T
    }
}

impl<T> Word for Option<NonNull<T>> {
    #[inline(always)]
    fn into_bits(self) -> u64 {
        self.map_or(0, |ptr| ptr.as_ptr() as usize as u64)
    }

    #[inline(always)]
    fn from_bits(bits: u64) -> Self {
        NonNull::new(bits as usize as *mut T)
    }
}

/// One shared data member of a versioned object.
///
/// Reads need a step and writes need a write step, but the field does not
/// validate anything itself. A read is either done while the containing
/// object's orec is held, or it is optimistic and the caller validates the
/// orec before acting on the result.
///
/// Writes land in place immediately. **Never `set` a field before the
/// containing object's orec has been acquired**: an unwind only restores
/// versions, not data.
///
/// ```
/// use stepcas::{Field, Orec, Ownable, Runtime, Step};
///
/// struct Counter {
///     orec: Orec,
///     hits: Field<u64>,
/// }
///
/// impl Ownable for Counter {
///     fn orec(&self) -> &Orec {
///         &self.orec
///     }
/// }
///
/// let runtime = Runtime::new();
/// let me = runtime.register().unwrap();
/// let counter = Counter { orec: Orec::new(), hits: Field::new(0) };
///
/// let step = me.write_step();
/// let version = step.check_orec(&counter);
/// assert!(step.acquire_continuation(&counter, version));
/// counter.hits.set(counter.hits.get(&step) + 1, &step);
/// drop(step);
///
/// let step = me.read_step();
/// assert_eq!(counter.hits.get(&step), 1);
/// ```
///
/// 版本化对象的一个共享数据成员。读取需要步骤，写入需要写步骤。
/// **在成功获取对象的 orec 之前，绝不要写入其字段。**
pub struct Field<T: Word> {
    bits: AtomicU64,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Word> Field<T> {
    #[inline]
    pub fn new(value: T) -> Self {
        Self {
            bits: AtomicU64::new(value.into_bits()),
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn get<S: Step>(&self, step: &S) -> T {
        debug_assert!(
            step.descriptor().in_step(),
            "BUG: field read through a step that has been unwound"
        );
        T::from_bits(self.bits.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set(&self, value: T, step: &WriteStep<'_>) {
        debug_assert!(
            step.descriptor().in_step(),
            "BUG: field write through a step that has been unwound"
        );
        self.bits.store(value.into_bits(), Ordering::Release);
    }

    /// Read with exclusive access, e.g. while tearing a structure down.
    #[inline]
    pub fn get_mut(&mut self) -> T {
        T::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

impl<T: Word + Default> Default for Field<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Word + fmt::Debug> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = T::from_bits(self.bits.load(Ordering::Relaxed));
        f.debug_tuple("Field").field(&value).finish()
    }
}
