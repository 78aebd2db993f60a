/// Size of an object reference in the heap dumps we read
pub const ID_SIZE: u64 = 4;

/// Dump id reserved for the synthetic super root
pub const SUPER_ROOT_ID: u64 = 0;

/// Arena index of the super root in every snapshot
pub const SUPER_ROOT_INDEX: usize = 0;

/// How many characters of a string value to show in reports
pub const STRING_PREVIEW_CHARS: isize = 200;

pub const JAVA_LANG_REF_REFERENCE: &str = "java.lang.ref.Reference";
pub const JAVA_LANG_STRING: &str = "java.lang.String";
pub const SUN_MISC_CLEANER: &str = "sun.misc.Cleaner";
pub const CLEANER_THUNK: &str = "libcore.util.NativeAllocationRegistry$CleanerThunk";
pub const NATIVE_ALLOCATION_REGISTRY: &str = "libcore.util.NativeAllocationRegistry";

/// Class name reported for instances whose class is unknown
pub const UNKNOWN_CLASS_NAME: &str = "???";

/// Default number of instances listed by the reports
pub const DEFAULT_TOP_N: usize = 20;
