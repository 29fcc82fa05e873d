//! Newline-delimited, pipe-separated wire format.
//!
//! | direction | line |
//! |---|---|
//! | client → server | `STATE|<client_id>|<o_1>|...|<o_D>` |
//! | server → client | `ACTION|<action_id>` |
//! | client → server | `REWARD|<client_id>|<reward>|<done>` |
//! | server → client | `ACK` |
use std::fmt;

use ndarray::Array1;

use crate::error::ProtocolParseError;
use crate::observation::Observation;

/// Longest accepted line, terminator excluded. A full 28-value STATE is far below it.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

const STATE: &str = "STATE";
const REWARD: &str = "REWARD";

/// Physical meaning of the action ids, owned by the robots. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotAction {
    Forward = 0,
    TurnLeft = 1,
    TurnRight = 2,
    Stop = 3,
}

impl RobotAction {
    pub fn from_id(id: usize) -> Option<Self> {
        match id {
            0 => Some(Self::Forward),
            1 => Some(Self::TurnLeft),
            2 => Some(Self::TurnRight),
            3 => Some(Self::Stop),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    State {
        client_id: String,
        observation: Observation,
    },
    Reward {
        client_id: String,
        reward: f64,
        done: bool,
    },
}

impl Request {
    pub fn client_id(&self) -> &str {
        match self {
            Self::State { client_id, .. } | Self::Reward { client_id, .. } => client_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Action(usize),
    Ack,
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Action(id) => write!(f, "ACTION|{id}"),
            Self::Ack => f.write_str("ACK"),
        }
    }
}

fn parse_number(field: impl Into<String>, value: &str) -> Result<f64, ProtocolParseError> {
    let field = field.into();
    let number: f64 = value
        .trim()
        .parse()
        .map_err(|_| ProtocolParseError::InvalidNumber {
            field: field.clone(),
            value: value.to_string(),
        })?;
    if number.is_finite() {
        Ok(number)
    } else {
        Err(ProtocolParseError::NonFinite { field })
    }
}

fn client_id<'a>(
    kind: &'static str,
    fields: &mut impl Iterator<Item = &'a str>,
) -> Result<String, ProtocolParseError> {
    match fields.next().map(str::trim) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(ProtocolParseError::MissingField {
            kind,
            field: "client_id",
        }),
    }
}

/// Parses one line (without its terminator) into a request.
///
/// STATE must carry exactly `observation_dim` finite numbers; REWARD a finite reward
/// and a done flag of `0` or `1`.
pub fn parse(line: &str, observation_dim: usize) -> Result<Request, ProtocolParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ProtocolParseError::Empty);
    }
    let mut fields = line.split('|');
    let kind = fields.next().unwrap_or_default();
    match kind {
        STATE => {
            let client_id = client_id(STATE, &mut fields)?;
            let values = fields
                .enumerate()
                .map(|(i, value)| parse_number(format!("o_{}", i + 1), value))
                .collect::<Result<Vec<f64>, _>>()?;
            if values.len() != observation_dim {
                return Err(ProtocolParseError::Dimension {
                    expected: observation_dim,
                    found: values.len(),
                });
            }
            Ok(Request::State {
                client_id,
                observation: Array1::from(values),
            })
        }
        REWARD => {
            let client_id = client_id(REWARD, &mut fields)?;
            let reward = match fields.next() {
                Some(value) => parse_number("reward", value)?,
                None => {
                    return Err(ProtocolParseError::MissingField {
                        kind: REWARD,
                        field: "reward",
                    })
                }
            };
            let done = match fields.next().map(str::trim) {
                Some("0") => false,
                Some("1") => true,
                Some(other) => return Err(ProtocolParseError::InvalidDone(other.to_string())),
                None => {
                    return Err(ProtocolParseError::MissingField {
                        kind: REWARD,
                        field: "done",
                    })
                }
            };
            let trailing = fields.count();
            if trailing > 0 {
                return Err(ProtocolParseError::TrailingFields {
                    kind: REWARD,
                    count: trailing,
                });
            }
            Ok(Request::Reward {
                client_id,
                reward,
                done,
            })
        }
        other => Err(ProtocolParseError::UnknownKind(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn parses_state() {
        let request = parse("STATE|3|0.5|-1|2e-1|7\n", 4).unwrap();
        assert_eq!(
            request,
            Request::State {
                client_id: "3".to_string(),
                observation: arr1(&[0.5, -1.0, 0.2, 7.0]),
            }
        );
        assert_eq!(request.client_id(), "3");
    }

    #[test]
    fn parses_reward() {
        assert_eq!(
            parse("REWARD|0|5.0|0", 28),
            Ok(Request::Reward {
                client_id: "0".to_string(),
                reward: 5.0,
                done: false
            })
        );
        assert_eq!(
            parse("REWARD|robot_2|-10|1\r", 28),
            Ok(Request::Reward {
                client_id: "robot_2".to_string(),
                reward: -10.0,
                done: true
            })
        );
    }

    #[test]
    fn full_size_state_line() {
        let values = (0..28).map(|i| format!("{}", i as f64 / 10.0)).collect::<Vec<_>>();
        let line = format!("STATE|1|{}", values.join("|"));
        let Request::State { observation, .. } = parse(&line, 28).unwrap() else {
            panic!("expected a state");
        };
        assert_eq!(observation.len(), 28);
        assert_eq!(observation[27], 2.7);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(parse("   ", 2), Err(ProtocolParseError::Empty));
        assert_eq!(
            parse("HELLO|1", 2),
            Err(ProtocolParseError::UnknownKind("HELLO".to_string()))
        );
        assert_eq!(
            parse("STATE|1|0.5", 2),
            Err(ProtocolParseError::Dimension {
                expected: 2,
                found: 1
            })
        );
        assert_eq!(
            parse("STATE||0.5|0.5", 2),
            Err(ProtocolParseError::MissingField {
                kind: "STATE",
                field: "client_id"
            })
        );
        assert_eq!(
            parse("STATE|1|0.5|abc", 2),
            Err(ProtocolParseError::InvalidNumber {
                field: "o_2".to_string(),
                value: "abc".to_string()
            })
        );
        assert_eq!(
            parse("STATE|1|NaN|0", 2),
            Err(ProtocolParseError::NonFinite {
                field: "o_1".to_string()
            })
        );
        assert_eq!(
            parse("REWARD|1|1.0|2", 2),
            Err(ProtocolParseError::InvalidDone("2".to_string()))
        );
        assert_eq!(
            parse("REWARD|1|1.0", 2),
            Err(ProtocolParseError::MissingField {
                kind: "REWARD",
                field: "done"
            })
        );
        assert_eq!(
            parse("REWARD|1|1.0|0|extra", 2),
            Err(ProtocolParseError::TrailingFields {
                kind: "REWARD",
                count: 1
            })
        );
    }

    #[test]
    fn responses_serialise() {
        assert_eq!(Response::Action(2).to_string(), "ACTION|2");
        assert_eq!(Response::Ack.to_string(), "ACK");
        assert_eq!(RobotAction::from_id(1), Some(RobotAction::TurnLeft));
        assert_eq!(RobotAction::from_id(4), None);
    }
}
