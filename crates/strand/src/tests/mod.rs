mod fsm;
