//! Foreign type and method signatures.
//!
//! The host runtime encodes types the JNI way:
//!
//! - `Z` boolean, `B` byte, `C` char, `S` short, `I` int, `J` long,
//!   `F` float, `D` double, `V` void
//! - `Lpkg/Name;` for a class
//! - `[T` for an array of `T`
//!
//! A method signature is the argument types in order inside parentheses,
//! followed by the result type: `(ILjava/lang/String;)V`.

use crate::descriptor::ClassDescriptor;

/// Renders a method signature from argument and result descriptors.
///
/// Argument order is significant and preserved.
///
/// ```
/// use jace::descriptor::ClassDescriptor;
/// use jace::signature::build_signature;
///
/// let int = ClassDescriptor::cached("I");
/// let string = ClassDescriptor::cached("Ljava/lang/String;");
/// assert_eq!(build_signature(&[int, string], int), "(ILjava/lang/String;)I");
/// assert_eq!(build_signature(&[], ClassDescriptor::cached("V")), "()V");
/// ```
#[must_use]
pub fn build_signature(args: &[&ClassDescriptor], result: &ClassDescriptor) -> String {
    let len = args.iter().map(|d| d.type_signature().len()).sum::<usize>()
        + result.type_signature().len()
        + 2;
    let mut signature = String::with_capacity(len);
    signature.push('(');
    for arg in args {
        signature.push_str(arg.type_signature());
    }
    signature.push(')');
    signature.push_str(result.type_signature());
    signature
}

/// Returns the length of the first complete type signature in `input`, or
/// `None` if it does not start with one.
fn type_len(input: &str) -> Option<usize> {
    let bytes = input.as_bytes();
    let mut i = 0;
    while bytes.get(i) == Some(&b'[') {
        i += 1;
    }
    match bytes.get(i)? {
        b'Z' | b'B' | b'C' | b'S' | b'I' | b'J' | b'F' | b'D' => Some(i + 1),
        b'V' if i == 0 => Some(1),
        b'L' => {
            let end = input[i..].find(';')?;
            // `L;` names nothing
            (end > 1).then_some(i + end + 1)
        }
        _ => None,
    }
}

/// True if `signature` is exactly one well-formed type signature.
///
/// ```
/// use jace::signature::is_type_signature;
///
/// assert!(is_type_signature("I"));
/// assert!(is_type_signature("[[Ljava/lang/String;"));
/// assert!(!is_type_signature("[V"));
/// assert!(!is_type_signature("II"));
/// assert!(!is_type_signature("Ljava/lang/String"));
/// ```
#[must_use]
pub fn is_type_signature(signature: &str) -> bool {
    type_len(signature) == Some(signature.len())
}

/// Splits a method signature into argument types and result type.
///
/// ```
/// use jace::signature::parse_method_signature;
///
/// let (args, ret) = parse_method_signature("(I[JLjava/lang/Object;)V").unwrap();
/// assert_eq!(args, ["I", "[J", "Ljava/lang/Object;"]);
/// assert_eq!(ret, "V");
///
/// assert!(parse_method_signature("I").is_none());
/// assert!(parse_method_signature("(V)V").is_none());
/// ```
#[must_use]
pub fn parse_method_signature(signature: &str) -> Option<(Vec<&str>, &str)> {
    let rest = signature.strip_prefix('(')?;
    let close = rest.find(')')?;
    let (mut params, ret) = (&rest[..close], &rest[close + 1..]);

    let mut args = Vec::new();
    while !params.is_empty() {
        let len = type_len(params)?;
        if &params[..len] == "V" {
            return None;
        }
        args.push(&params[..len]);
        params = &params[len..];
    }

    is_type_signature(ret).then_some((args, ret))
}
