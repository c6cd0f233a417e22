//! Closed event sets.
//!
//! An active object consumes exactly one event type, and that type is a
//! closed set of small, copyable payloads. [`event_variant!`] declares such a
//! set as an ordinary Rust enum and wires up the traits in this module:
//!
//! - [`EventVariant`] exposes the runtime discriminant of the active
//!   alternative and [`EventVariant::contains`], which only compiles for
//!   payload types that belong to the set.
//! - [`Alternative`] links each payload type to its enum and discriminant.
//! - [`Handler`] is implemented by visitors, once per payload type. The
//!   generated `visit` method requires a `Handler` for every alternative, so a
//!   visitor that forgets a case is rejected by the compiler.
//!
//! ```
//! use strand::event::{EventVariant, Handler};
//!
//! #[derive(Debug, Clone, Copy)]
//! pub struct Start;
//! #[derive(Debug, Clone, Copy)]
//! pub struct Speed(pub u32);
//!
//! strand::event_variant! {
//!     pub enum Command {
//!         Start(Start),
//!         Speed(Speed),
//!     }
//! }
//!
//! struct Printer;
//! impl Handler<Start, String> for Printer {
//!     fn handle(&mut self, _: &Start) -> String { "start".into() }
//! }
//! impl Handler<Speed, String> for Printer {
//!     fn handle(&mut self, s: &Speed) -> String { format!("speed {}", s.0) }
//! }
//!
//! let cmd = Command::from(Speed(7));
//! assert!(cmd.contains::<Speed>());
//! assert!(!cmd.contains::<Start>());
//! let described: String = cmd.visit(&mut Printer);
//! assert_eq!(described, "speed 7");
//! ```

use core::fmt;

/// A closed set of copyable event payloads carried as one value.
///
/// Implemented by [`event_variant!`]; hand-written implementations must keep
/// discriminants unique and consistent with [`Alternative::DISCRIMINANT`].
pub trait EventVariant: Copy + Send + fmt::Debug + 'static {
    /// Number of alternatives in the set.
    const ALTERNATIVES: usize;

    /// Discriminant of the active alternative, assigned in declaration order.
    fn discriminant(&self) -> u8;

    /// Name of the active alternative.
    fn alternative_name(&self) -> &'static str;

    /// Returns `true` when the active alternative is exactly `T`.
    ///
    /// Asking about a type outside the set is a compile error.
    fn contains<T>(&self) -> bool
    where
        Self: Alternative<T>,
    {
        self.discriminant() == <Self as Alternative<T>>::DISCRIMINANT
    }
}

/// Membership of payload type `T` in an event set.
pub trait Alternative<T>: EventVariant + From<T> {
    const DISCRIMINANT: u8;

    /// Borrows the payload if `T` is the active alternative.
    fn get(&self) -> Option<&T>;
}

/// Reaction of a visitor to one alternative.
pub trait Handler<T, R = ()> {
    fn handle(&mut self, event: &T) -> R;
}

/// Declares a closed event set.
///
/// Each variant wraps exactly one payload type and payload types must be
/// distinct. Payloads must be `Copy`: the generated enum derives `Copy`, so a
/// payload owning heap resources fails to compile.
///
/// The generated enum gets `From<Payload>`, [`EventVariant`],
/// [`Alternative`] for every payload and an inherent `visit` method.
#[macro_export]
macro_rules! event_variant {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident($payload:ty)),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy)]
        $vis enum $name {
            $($variant($payload)),+
        }

        impl $crate::event::EventVariant for $name {
            const ALTERNATIVES: usize = [$(stringify!($variant)),+].len();

            fn discriminant(&self) -> u8 {
                match self {
                    $($name::$variant(_) => {
                        <Self as $crate::event::Alternative<$payload>>::DISCRIMINANT
                    })+
                }
            }

            fn alternative_name(&self) -> &'static str {
                match self {
                    $($name::$variant(_) => stringify!($variant),)+
                }
            }
        }

        impl $name {
            /// Invokes the visitor's handler for the active alternative.
            #[allow(dead_code)]
            pub fn visit<V, R>(&self, visitor: &mut V) -> R
            where
                V: $($crate::event::Handler<$payload, R> +)+ ?Sized,
            {
                match self {
                    $($name::$variant(event) => {
                        <V as $crate::event::Handler<$payload, R>>::handle(visitor, event)
                    })+
                }
            }
        }

        $crate::__event_alternatives!($name; 0u8; $($variant($payload)),+);
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __event_alternatives {
    ($name:ident; $index:expr; ) => {};
    ($name:ident; $index:expr; $variant:ident($payload:ty) $(, $rest:ident($rest_payload:ty))*) => {
        impl ::core::convert::From<$payload> for $name {
            fn from(event: $payload) -> Self {
                $name::$variant(event)
            }
        }

        impl $crate::event::Alternative<$payload> for $name {
            const DISCRIMINANT: u8 = $index;

            #[allow(unreachable_patterns)]
            fn get(&self) -> ::core::option::Option<&$payload> {
                match self {
                    $name::$variant(event) => ::core::option::Option::Some(event),
                    _ => ::core::option::Option::None,
                }
            }
        }

        $crate::__event_alternatives!($name; $index + 1; $($rest($rest_payload)),*);
    };
}

#[cfg(test)]
mod tests {
    use super::{Alternative, EventVariant, Handler};

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Ping;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Level(i32);

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Label([u8; 8]);

    crate::event_variant! {
        enum Sample {
            Ping(Ping),
            Level(Level),
            Label(Label),
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Vec<&'static str>,
        level: Option<i32>,
    }

    impl Handler<Ping> for Recorder {
        fn handle(&mut self, _: &Ping) {
            self.seen.push("ping");
        }
    }

    impl Handler<Level> for Recorder {
        fn handle(&mut self, event: &Level) {
            self.seen.push("level");
            self.level = Some(event.0);
        }
    }

    impl Handler<Label> for Recorder {
        fn handle(&mut self, _: &Label) {
            self.seen.push("label");
        }
    }

    #[test]
    fn discriminants_follow_declaration_order() {
        assert_eq!(<Sample as Alternative<Ping>>::DISCRIMINANT, 0);
        assert_eq!(<Sample as Alternative<Level>>::DISCRIMINANT, 1);
        assert_eq!(<Sample as Alternative<Label>>::DISCRIMINANT, 2);
        assert_eq!(Sample::ALTERNATIVES, 3);

        let event = Sample::from(Label(*b"abcdefgh"));
        assert_eq!(event.discriminant(), 2);
        assert_eq!(event.alternative_name(), "Label");
    }

    #[test]
    fn contains_reports_only_the_active_alternative() {
        let event = Sample::from(Level(-4));
        assert!(event.contains::<Level>());
        assert!(!event.contains::<Ping>());
        assert!(!event.contains::<Label>());
    }

    #[test]
    fn visit_observes_the_constructed_payload() {
        let mut recorder = Recorder::default();
        Sample::from(Level(42)).visit::<_, ()>(&mut recorder);
        Sample::from(Ping).visit::<_, ()>(&mut recorder);

        assert_eq!(recorder.seen, vec!["level", "ping"]);
        assert_eq!(recorder.level, Some(42));
    }

    #[test]
    fn get_borrows_matching_payload() {
        let event = Sample::from(Level(9));
        assert_eq!(<Sample as Alternative<Level>>::get(&event), Some(&Level(9)));
        assert_eq!(<Sample as Alternative<Ping>>::get(&event), None);
    }

    #[test]
    fn events_are_copied_freely() {
        let event = Sample::from(Level(1));
        let copy = event;
        assert!(event.contains::<Level>());
        assert!(copy.contains::<Level>());
    }
}
